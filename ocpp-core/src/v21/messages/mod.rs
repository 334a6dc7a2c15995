pub mod boot_notification;
pub mod data_transfer;
pub mod heartbeat;
pub mod reset;
pub mod secure_data_transfer;
