pub mod base32;
pub mod gate;
pub mod totp;

pub use gate::GateController;
pub use totp::TotpService;
