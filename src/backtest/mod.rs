pub mod synthetic;

pub use synthetic::{Scenario, SyntheticDataGenerator};
