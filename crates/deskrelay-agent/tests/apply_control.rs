//! Integration tests for control application through the public API.
//!
//! A stream of viewer intents, as decoded from the relay, is pushed through
//! [`ApplyControlUseCase`] backed by the recording [`MockInputInjector`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use deskrelay_agent::application::{ApplyControlUseCase, ControlOutcome, InputInjector};
use deskrelay_agent::infrastructure::input_injection::MockInputInjector;
use deskrelay_core::ControlPayload;

fn payload(json: &str) -> ControlPayload {
    serde_json::from_str(json).unwrap()
}

fn use_case(injector: &Arc<MockInputInjector>, interval_ms: u64) -> ApplyControlUseCase {
    ApplyControlUseCase::new(
        Arc::clone(injector) as Arc<dyn InputInjector>,
        Duration::from_millis(interval_ms),
    )
}

#[test]
fn test_drag_sequence_from_viewer() {
    // Arrange
    let injector = Arc::new(MockInputInjector::with_screen(1001, 501));
    let mut uc = use_case(&injector, 6);
    let t0 = Instant::now();
    let steps = [
        (0, r#"{"type":"mouse","action":"move","x_norm":0.1,"y_norm":0.1}"#),
        (10, r#"{"type":"mouse","action":"down"}"#),
        (20, r#"{"type":"mouse","action":"move","x_norm":0.5,"y_norm":0.5}"#),
        (22, r#"{"type":"mouse","action":"move","x_norm":0.6,"y_norm":0.6}"#),
        (30, r#"{"type":"mouse","action":"move","x_norm":0.9,"y_norm":0.9}"#),
        (40, r#"{"type":"mouse","action":"up","button":"left"}"#),
    ];

    // Act
    let outcomes: Vec<_> = steps
        .iter()
        .map(|(ms, json)| {
            uc.apply_at(&payload(json), t0 + Duration::from_millis(*ms))
                .unwrap()
        })
        .collect();

    // Assert: the move 2 ms after the previous one is throttled
    assert_eq!(outcomes[3], ControlOutcome::Throttled);
    assert_eq!(injector.moves(), vec![(100, 50), (500, 250), (900, 450)]);
    assert_eq!(injector.buttons().len(), 2);
}

#[test]
fn test_every_move_echoes_even_when_throttled() {
    let injector = Arc::new(MockInputInjector::new());
    let mut uc = use_case(&injector, 1_000);
    let mut echoes = 0;

    for i in 0..5 {
        let p = payload(&format!(
            r#"{{"type":"mouse","action":"move","x_norm":0.{i},"y_norm":0.5}}"#
        ));
        if ApplyControlUseCase::cursor_echo(&p).is_some() {
            echoes += 1;
        }
        let _ = uc.apply(&p);
    }

    assert_eq!(echoes, 5);
    assert_eq!(injector.moves().len(), 1);
}

#[test]
fn test_typing_with_shift_and_unknown_character() {
    // Arrange
    let injector = Arc::new(MockInputInjector::new());
    let mut uc = use_case(&injector, 6);
    let stream = [
        r#"{"type":"key","action":"down","key":"Shift"}"#,
        r#"{"type":"key","action":"down","key":"A","raw_key":"A"}"#,
        r#"{"type":"key","action":"up","key":"A","raw_key":"A"}"#,
        r#"{"type":"key","action":"up","key":"Shift"}"#,
        r#"{"type":"key","action":"down","key":"ß","raw_key":"ß"}"#,
        r#"{"type":"key","action":"up","key":"ß","raw_key":"ß"}"#,
    ];

    // Act
    for json in stream {
        uc.apply(&payload(json)).unwrap();
    }

    // Assert
    assert_eq!(injector.key_downs(), vec!["shift", "a"]);
    assert_eq!(injector.key_ups(), vec!["a", "shift"]);
    assert_eq!(injector.typed(), vec!["ß"]);
}

#[test]
fn test_unrecognised_button_names_click_left() {
    let injector = Arc::new(MockInputInjector::new());
    let mut uc = use_case(&injector, 6);

    uc.apply(&payload(
        r#"{"type":"mouse","action":"click","button":"back"}"#,
    ))
    .unwrap();

    assert_eq!(
        injector.clicks(),
        vec![deskrelay_core::protocol::messages::MouseButton::Left]
    );
}

#[test]
fn test_injection_failure_does_not_poison_later_controls() {
    let injector = Arc::new(MockInputInjector::new());
    let mut uc = use_case(&injector, 0);
    let click = payload(r#"{"type":"mouse","action":"click"}"#);

    injector.set_should_fail(true);
    assert!(uc.apply(&click).is_err());
    injector.set_should_fail(false);

    assert!(uc.apply(&click).is_ok());
    assert_eq!(injector.clicks().len(), 1);
}
