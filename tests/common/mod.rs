#![allow(dead_code)]

pub mod recording;
pub mod repositories;

pub use fixtures::{Order, User};
pub use recording::{fail, AppError, Event, Label, MemFacade, Outcome, RecordingAdapter};
pub use repositories::{OrderRepository, RollbackTracker, UserRepository};
