pub mod amount;
pub mod audit;
pub mod auth;
pub mod config;
pub mod csv;
pub mod engine;
pub mod limit;
pub mod model;
pub mod store;
pub mod transition;
pub mod webhook;

pub use amount::Amount;
pub use config::Config;
pub use engine::{Command, Engine, EngineError};
pub use model::{
    Donation, DonationId, DonationStatus, NewDonation, Owner, UserAggregate, UserId,
};
