#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetStatus {
    Accepted,
    Rejected,
    Scheduled,
}
