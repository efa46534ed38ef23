pub mod flutterwave;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveGateway};
