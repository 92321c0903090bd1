//! Application layer for deskrelay-agent.

pub mod apply_control;

pub use apply_control::{
    ApplyControlUseCase, ControlOutcome, CursorEcho, InjectionError, InputInjector, ScreenSize,
};
