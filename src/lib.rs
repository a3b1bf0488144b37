pub mod cabin;
pub mod collection;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod floor;
pub mod plan;
pub mod stop_list;

pub use config::Config;
pub use controller::Controller;
pub use error::CoreError;
pub use event_bus::EventBus;
