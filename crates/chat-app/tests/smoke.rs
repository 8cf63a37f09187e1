use vayal::i18n::{Language, system_instruction, translations};

#[test]
fn smoke_marker_is_stable() {
    assert_eq!(vayal::smoke_marker(), "vayal");
}

#[test]
fn public_surface_is_wired_together() {
    let controller = vayal::chat::ChatController::new(Language::En);
    let snapshot = controller.snapshot();
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.session_ready);

    assert!(!system_instruction(Language::Ta).is_empty());
    assert!(!translations(Language::En).welcome_title.is_empty());
}
