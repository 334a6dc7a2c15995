mod boot_reason;
mod charging_station;
mod data_transfer_status;
mod registration_status;
mod reset_status;
mod reset_type;
mod secure_data_transfer_status;
mod status_info;

pub use boot_reason::BootReason;
pub use charging_station::ChargingStation;
pub use data_transfer_status::DataTransferStatus;
pub use registration_status::RegistrationStatus;
pub use reset_status::ResetStatus;
pub use reset_type::ResetType;
pub use secure_data_transfer_status::SecureDataTransferStatus;
pub use status_info::StatusInfo;
