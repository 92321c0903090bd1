//! ApplyControlUseCase: turns viewer control intents into injected input.
//!
//! Viewers describe the pointer in normalised `[0, 1]` coordinates and keys by
//! browser-style names.  This use case maps both onto the host's screen and
//! the injector's key vocabulary, and throttles pointer moves so a fast
//! viewer cannot flood the OS input queue.
//!
//! The actual injection is delegated to an [`InputInjector`] trait object.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deskrelay_core::protocol::messages::{KeyAction, KeyControl, MouseButton, MouseControl};
use deskrelay_core::ControlPayload;
use thiserror::Error;

/// Default minimum gap between two injected pointer moves.
pub const DEFAULT_MOUSE_MIN_INTERVAL: Duration = Duration::from_millis(6);

/// How long a reported screen size is trusted before asking again.
pub const SCREEN_SIZE_TTL: Duration = Duration::from_secs(2);

/// Key names that are only ever pressed or released, never typed.
const MODIFIER_KEYS: [&str; 7] = [
    "shift", "control", "ctrl", "alt", "meta", "command", "capslock",
];

/// Error type for input injection.
#[derive(Debug, Error, PartialEq)]
pub enum InjectionError {
    /// The injector has no mapping for this key name.
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("platform error: {0}")]
    Platform(String),
}

/// Screen dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Platform-agnostic input injection.
///
/// Key names passed to `press_key`/`release_key` are already lower-cased,
/// with arrows spelled `arrowleft`, `arrowright`, `arrowup`, `arrowdown`.
pub trait InputInjector: Send + Sync {
    fn screen_size(&self) -> Result<ScreenSize, InjectionError>;

    /// Moves the pointer to an absolute pixel position.
    fn move_mouse(&self, x: i32, y: i32) -> Result<(), InjectionError>;

    fn click(&self, button: MouseButton) -> Result<(), InjectionError>;

    fn press_button(&self, button: MouseButton) -> Result<(), InjectionError>;

    fn release_button(&self, button: MouseButton) -> Result<(), InjectionError>;

    fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), InjectionError>;

    /// Returns [`InjectionError::UnknownKey`] for names it cannot map.
    fn press_key(&self, key: &str) -> Result<(), InjectionError>;

    fn release_key(&self, key: &str) -> Result<(), InjectionError>;

    /// Types literal text, independent of the keyboard layout.
    fn type_text(&self, text: &str) -> Result<(), InjectionError>;
}

/// What happened to one control intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    /// A pointer move arrived inside the throttle interval and was skipped.
    Throttled,
    /// An unknown key was typed as its raw character instead.
    Typed,
    /// Nothing to inject (e.g. the release of a key that was typed).
    Ignored,
}

/// Cursor position echoed to viewers, normalised to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorEcho {
    pub x_norm: f64,
    pub y_norm: f64,
}

/// Applies viewer control intents through an [`InputInjector`].
pub struct ApplyControlUseCase {
    injector: Arc<dyn InputInjector>,
    mouse_min_interval: Duration,
    last_move_at: Option<Instant>,
    screen: Option<(ScreenSize, Instant)>,
}

impl ApplyControlUseCase {
    pub fn new(injector: Arc<dyn InputInjector>, mouse_min_interval: Duration) -> Self {
        Self {
            injector,
            mouse_min_interval,
            last_move_at: None,
            screen: None,
        }
    }

    /// The cursor echo for `payload`, if it is a pointer move.
    ///
    /// Throttled moves echo too, so viewers track the pointer smoothly even
    /// when injection is skipped.
    pub fn cursor_echo(payload: &ControlPayload) -> Option<CursorEcho> {
        match payload {
            ControlPayload::Mouse(MouseControl::Move { x_norm, y_norm }) => Some(CursorEcho {
                x_norm: clamp_unit(*x_norm),
                y_norm: clamp_unit(*y_norm),
            }),
            _ => None,
        }
    }

    /// Applies one control intent.
    ///
    /// # Errors
    ///
    /// Returns the injector's error.  Callers log it and carry on; a failed
    /// injection never affects the relay connection.
    pub fn apply(&mut self, payload: &ControlPayload) -> Result<ControlOutcome, InjectionError> {
        self.apply_at(payload, Instant::now())
    }

    /// [`apply`](Self::apply) with an explicit clock.
    pub fn apply_at(
        &mut self,
        payload: &ControlPayload,
        now: Instant,
    ) -> Result<ControlOutcome, InjectionError> {
        match payload {
            ControlPayload::Mouse(mouse) => self.apply_mouse(mouse, now),
            ControlPayload::Key(key) => self.apply_key(key),
        }
    }

    fn apply_mouse(
        &mut self,
        mouse: &MouseControl,
        now: Instant,
    ) -> Result<ControlOutcome, InjectionError> {
        match *mouse {
            MouseControl::Move { x_norm, y_norm } => {
                if self
                    .last_move_at
                    .is_some_and(|at| now.saturating_duration_since(at) < self.mouse_min_interval)
                {
                    return Ok(ControlOutcome::Throttled);
                }
                self.last_move_at = Some(now);

                let size = self.screen_size_at(now)?;
                let x = scale(x_norm, size.width);
                let y = scale(y_norm, size.height);
                self.injector.move_mouse(x, y)?;
            }
            MouseControl::Click { button } => self.injector.click(button)?,
            MouseControl::Down { button } => self.injector.press_button(button)?,
            MouseControl::Up { button } => self.injector.release_button(button)?,
            MouseControl::Scroll { delta_x, delta_y } => self.injector.scroll(delta_x, delta_y)?,
        }
        Ok(ControlOutcome::Applied)
    }

    fn apply_key(&mut self, key: &KeyControl) -> Result<ControlOutcome, InjectionError> {
        let name = normalize_key_name(&key.key);
        let result = match key.action {
            KeyAction::Down => self.injector.press_key(&name),
            KeyAction::Up => self.injector.release_key(&name),
        };

        match result {
            Ok(()) => Ok(ControlOutcome::Applied),
            Err(InjectionError::UnknownKey(_)) if !is_modifier(&name) => match key.action {
                KeyAction::Down => match single_char(key.raw_key.as_deref()) {
                    Some(text) => {
                        self.injector.type_text(text)?;
                        Ok(ControlOutcome::Typed)
                    }
                    None => Err(InjectionError::UnknownKey(name)),
                },
                KeyAction::Up => Ok(ControlOutcome::Ignored),
            },
            Err(e) => Err(e),
        }
    }

    fn screen_size_at(&mut self, now: Instant) -> Result<ScreenSize, InjectionError> {
        if let Some((size, fetched_at)) = self.screen {
            if now.saturating_duration_since(fetched_at) < SCREEN_SIZE_TTL {
                return Ok(size);
            }
        }
        let size = self.injector.screen_size()?;
        self.screen = Some((size, now));
        Ok(size)
    }
}

/// Lower-cases `key` and spells bare arrow names the way injectors expect.
pub fn normalize_key_name(key: &str) -> String {
    let lower = key.to_lowercase();
    match lower.as_str() {
        "left" | "right" | "up" | "down" => format!("arrow{lower}"),
        _ => lower,
    }
}

fn is_modifier(name: &str) -> bool {
    MODIFIER_KEYS.contains(&name)
}

fn single_char(raw: Option<&str>) -> Option<&str> {
    raw.filter(|s| s.chars().count() == 1)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn scale(norm: f64, extent: u32) -> i32 {
    let max = f64::from(extent.saturating_sub(1));
    (clamp_unit(norm) * max).round() as i32
}

// ── Tests ─────────────────────────────────────────────────────────────────────
