use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use crate::cancel::CancellationSignal;
use crate::terminal::queue::InputSender;

/// Interactive input that can be checked without blocking
pub trait InputSource: Send {
    /// Return whatever input is available right now, or `None` if nothing is pending
    fn try_read(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Keyboard input from the local console via crossterm events
#[derive(Debug, Default)]
pub struct ConsoleInput;

impl InputSource for ConsoleInput {
    fn try_read(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut bytes = Vec::new();
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) => bytes.extend(encode_key(&key)),
                Event::Paste(text) => bytes.extend_from_slice(text.as_bytes()),
                Event::Resize(cols, rows) => {
                    log::debug!("Local terminal resized to {}x{}", cols, rows);
                }
                _ => {}
            }
        }
        Ok((!bytes.is_empty()).then_some(bytes))
    }
}

/// Puts the local terminal in raw mode and restores it on drop
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            log::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Encode a key press as the bytes a VT-style terminal expects
pub fn encode_key(key: &KeyEvent) -> Vec<u8> {
    if key.kind == KeyEventKind::Release {
        return Vec::new();
    }

    let mut bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            match control_byte(c) {
                Some(b) => vec![b],
                None => c.to_string().into_bytes(),
            }
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Tab => b"\t".to_vec(),
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::F(n) => function_key(n),
        _ => Vec::new(),
    };

    if key.modifiers.contains(KeyModifiers::ALT) && !bytes.is_empty() {
        bytes.insert(0, 0x1b);
    }
    bytes
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        _ => None,
    }
}

fn function_key(n: u8) -> Vec<u8> {
    match n {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        10 => b"\x1b[21~".to_vec(),
        11 => b"\x1b[23~".to_vec(),
        12 => b"\x1b[24~".to_vec(),
        _ => Vec::new(),
    }
}

/// Start the dedicated input-capture thread.
///
/// The thread checks `source` without blocking, pushes any captured bytes to
/// the queue, and sleeps `poll_interval` when nothing was pending. It exits
/// when `cancel` fires or the queue is dropped. A read error cancels the
/// session and is returned from the thread.
pub fn spawn_input_capture(
    mut source: Box<dyn InputSource>,
    sender: InputSender,
    cancel: CancellationSignal,
    poll_interval: Duration,
) -> io::Result<JoinHandle<io::Result<()>>> {
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            log::debug!("Input capture started");
            while !cancel.is_cancelled() {
                match source.try_read() {
                    Ok(Some(bytes)) if !bytes.is_empty() => {
                        if sender.push(bytes).is_err() {
                            log::debug!("Input queue closed");
                            break;
                        }
                    }
                    Ok(_) => thread::sleep(poll_interval),
                    Err(e) => {
                        log::error!("Failed to read console input: {}", e);
                        cancel.cancel();
                        return Err(e);
                    }
                }
            }
            log::debug!("Input capture stopped");
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::queue::input_queue;
    use std::collections::VecDeque;
    use std::time::Instant;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_encode_printable_and_control_keys() {
        assert_eq!(encode_key(&press(KeyCode::Char('a'), KeyModifiers::NONE)), b"a");
        assert_eq!(encode_key(&press(KeyCode::Char('é'), KeyModifiers::NONE)), "é".as_bytes());
        assert_eq!(encode_key(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)), vec![0x03]);
        assert_eq!(encode_key(&press(KeyCode::Char('D'), KeyModifiers::CONTROL)), vec![0x04]);
        assert_eq!(encode_key(&press(KeyCode::Enter, KeyModifiers::NONE)), b"\r");
        assert_eq!(encode_key(&press(KeyCode::Backspace, KeyModifiers::NONE)), vec![0x7f]);
    }

    #[test]
    fn test_encode_navigation_and_alt() {
        assert_eq!(encode_key(&press(KeyCode::Up, KeyModifiers::NONE)), b"\x1b[A");
        assert_eq!(encode_key(&press(KeyCode::F(5), KeyModifiers::NONE)), b"\x1b[15~");
        assert_eq!(encode_key(&press(KeyCode::Char('b'), KeyModifiers::ALT)), b"\x1bb");
    }

    #[test]
    fn test_key_release_is_ignored() {
        let mut key = press(KeyCode::Char('a'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert!(encode_key(&key).is_empty());
    }

    struct Scripted(VecDeque<Vec<u8>>);

    impl InputSource for Scripted {
        fn try_read(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }
    }

    struct Failing;

    impl InputSource for Failing {
        fn try_read(&mut self) -> io::Result<Option<Vec<u8>>> {
            Err(io::Error::new(io::ErrorKind::Other, "console gone"))
        }
    }

    #[test]
    fn test_capture_thread_queues_input_and_stops_on_cancel() {
        let (sender, mut queue) = input_queue();
        let cancel = CancellationSignal::new();
        let source = Scripted(VecDeque::from(vec![b"ls".to_vec(), b"\r".to_vec()]));

        let handle = spawn_input_capture(
            Box::new(source),
            sender,
            cancel.clone(),
            Duration::from_millis(5),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut captured = Vec::new();
        while captured.len() < 3 && Instant::now() < deadline {
            captured.extend(queue.drain());
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(captured, b"ls\r".to_vec());

        let cancelled_at = Instant::now();
        cancel.cancel();
        assert!(handle.join().unwrap().is_ok());
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_capture_thread_returns_read_error_and_cancels() {
        let (sender, _queue) = input_queue();
        let cancel = CancellationSignal::new();

        let handle =
            spawn_input_capture(Box::new(Failing), sender, cancel.clone(), Duration::from_millis(5))
                .unwrap();
        let error = handle.join().unwrap().unwrap_err();

        assert_eq!(error.to_string(), "console gone");
        assert!(cancel.is_cancelled());
    }
}
