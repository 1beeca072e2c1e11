use std::io::Cursor;

use server_warden::orchestrator::relay::{is_control_word, read_lines, CONTROL_WORDS};
use tokio::sync::mpsc;

#[test]
fn control_words_are_recognised() {
    for word in CONTROL_WORDS {
        assert!(is_control_word(word.as_bytes()), "{word} should be a control word");
    }
}

#[test]
fn control_words_are_case_sensitive_and_exact() {
    for line in ["Shutdown", "QUIT", "exit ", " quit", "shutdown now", "stop", ""] {
        assert!(!is_control_word(line.as_bytes()), "{line:?} must be forwarded only");
    }
}

#[test]
fn non_utf8_bytes_are_not_a_control_word() {
    assert!(!is_control_word(b"shutdown\xff"));
    assert!(!is_control_word(b"\xe9xit"));
}

#[test]
fn invalid_utf8_line_does_not_end_input() {
    let (tx, mut rx) = mpsc::channel(8);
    let input = Cursor::new(b"say caf\xe9\nsay hello\r\nshutdown".to_vec());

    assert_eq!(read_lines(input, &tx), 3);

    assert_eq!(rx.try_recv().unwrap(), b"say caf\xe9");
    assert_eq!(rx.try_recv().unwrap(), b"say hello");
    assert_eq!(rx.try_recv().unwrap(), b"shutdown");
}

#[test]
fn blank_lines_are_forwarded() {
    let (tx, mut rx) = mpsc::channel(8);

    assert_eq!(read_lines(Cursor::new(b"\n\n".to_vec()), &tx), 2);
    assert_eq!(rx.try_recv().unwrap(), b"");
    assert_eq!(rx.try_recv().unwrap(), b"");
}

#[test]
fn reading_stops_when_relay_is_gone() {
    let (tx, rx) = mpsc::channel(8);
    drop(rx);

    assert_eq!(read_lines(Cursor::new(b"say hi\nshutdown\n".to_vec()), &tx), 0);
}
