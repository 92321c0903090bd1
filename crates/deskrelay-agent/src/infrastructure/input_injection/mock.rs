//! Recording input injector.
//!
//! Performs no OS calls.  Every injected event is pushed into a
//! `Mutex<Vec<...>>` so tests can assert exactly what was injected and in
//! what order.  The agent binary also runs with it when no platform injector
//! is linked in, which makes it a dry-run host.
//!
//! # `should_fail` flag
//!
//! Call [`MockInputInjector::set_should_fail`] to make every method return
//! [`InjectionError::Platform`], for exercising error paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use deskrelay_core::protocol::messages::MouseButton;

use crate::application::apply_control::{InjectionError, InputInjector, ScreenSize};

/// Named keys the mock recognises besides single letters and digits.
const NAMED_KEYS: &[&str] = &[
    "enter", "tab", "escape", "backspace", "delete", "insert", "space", " ", "home", "end",
    "pageup", "pagedown", "arrowleft", "arrowright", "arrowup", "arrowdown", "shift", "control",
    "ctrl", "alt", "meta", "command", "capslock", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8",
    "f9", "f10", "f11", "f12",
];

/// An [`InputInjector`] that records calls instead of injecting them.
#[derive(Debug)]
pub struct MockInputInjector {
    screen: Mutex<ScreenSize>,
    known_keys: HashSet<String>,
    should_fail: AtomicBool,
    screen_size_calls: AtomicUsize,
    moves: Mutex<Vec<(i32, i32)>>,
    clicks: Mutex<Vec<MouseButton>>,
    /// `(button, pressed)`
    buttons: Mutex<Vec<(MouseButton, bool)>>,
    scrolls: Mutex<Vec<(i32, i32)>>,
    key_downs: Mutex<Vec<String>>,
    key_ups: Mutex<Vec<String>>,
    typed: Mutex<Vec<String>>,
}

impl Default for MockInputInjector {
    fn default() -> Self {
        let known_keys = NAMED_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(('a'..='z').chain('0'..='9').map(String::from))
            .collect();
        Self {
            screen: Mutex::new(ScreenSize {
                width: 1920,
                height: 1080,
            }),
            known_keys,
            should_fail: AtomicBool::new(false),
            screen_size_calls: AtomicUsize::new(0),
            moves: Mutex::default(),
            clicks: Mutex::default(),
            buttons: Mutex::default(),
            scrolls: Mutex::default(),
            key_downs: Mutex::default(),
            key_ups: Mutex::default(),
            typed: Mutex::default(),
        }
    }
}

impl MockInputInjector {
    /// A 1920x1080 screen that knows letters, digits and common named keys.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen(width: u32, height: u32) -> Self {
        let mock = Self::default();
        mock.set_screen_size(width, height);
        mock
    }

    /// Replaces the set of key names `press_key`/`release_key` accept.
    pub fn with_known_keys(mut self, keys: &[&str]) -> Self {
        self.known_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn set_screen_size(&self, width: u32, height: u32) {
        *lock(&self.screen) = ScreenSize { width, height };
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn screen_size_calls(&self) -> usize {
        self.screen_size_calls.load(Ordering::Relaxed)
    }

    pub fn moves(&self) -> Vec<(i32, i32)> {
        lock(&self.moves).clone()
    }

    pub fn clicks(&self) -> Vec<MouseButton> {
        lock(&self.clicks).clone()
    }

    pub fn buttons(&self) -> Vec<(MouseButton, bool)> {
        lock(&self.buttons).clone()
    }

    pub fn scrolls(&self) -> Vec<(i32, i32)> {
        lock(&self.scrolls).clone()
    }

    pub fn key_downs(&self) -> Vec<String> {
        lock(&self.key_downs).clone()
    }

    pub fn key_ups(&self) -> Vec<String> {
        lock(&self.key_ups).clone()
    }

    pub fn typed(&self) -> Vec<String> {
        lock(&self.typed).clone()
    }

    fn check(&self) -> Result<(), InjectionError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(InjectionError::Platform("mock failure".into()));
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<(), InjectionError> {
        self.check()?;
        if !self.known_keys.contains(key) {
            return Err(InjectionError::UnknownKey(key.to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InputInjector for MockInputInjector {
    fn screen_size(&self) -> Result<ScreenSize, InjectionError> {
        self.check()?;
        self.screen_size_calls.fetch_add(1, Ordering::Relaxed);
        Ok(*lock(&self.screen))
    }

    fn move_mouse(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.moves).push((x, y));
        Ok(())
    }

    fn click(&self, button: MouseButton) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.clicks).push(button);
        Ok(())
    }

    fn press_button(&self, button: MouseButton) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.buttons).push((button, true));
        Ok(())
    }

    fn release_button(&self, button: MouseButton) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.buttons).push((button, false));
        Ok(())
    }

    fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.scrolls).push((delta_x, delta_y));
        Ok(())
    }

    fn press_key(&self, key: &str) -> Result<(), InjectionError> {
        self.check_key(key)?;
        lock(&self.key_downs).push(key.to_string());
        Ok(())
    }

    fn release_key(&self, key: &str) -> Result<(), InjectionError> {
        self.check_key(key)?;
        lock(&self.key_ups).push(key.to_string());
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), InjectionError> {
        self.check()?;
        lock(&self.typed).push(text.to_string());
        Ok(())
    }
}
