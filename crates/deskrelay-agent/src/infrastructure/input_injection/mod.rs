//! Input injector implementations.
//!
//! Only the recording [`mock::MockInputInjector`] ships with this crate.
//! Platform injectors live with the embedding application and implement
//! [`InputInjector`](crate::application::InputInjector).

pub mod mock;

pub use mock::MockInputInjector;
