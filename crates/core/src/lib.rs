pub mod catalog;
pub mod clock;
pub mod device;
pub mod error;
pub mod interpreter;
pub mod logger;
pub mod observer;
pub mod probe;
pub mod rig;
pub mod scheduler;
pub mod settings;
pub mod slots;
pub mod step;
pub mod supervisor;
pub mod types;
pub mod vision;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
