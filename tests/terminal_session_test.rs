
use std::time::Duration;

use cloud_shell::{
    CancellationSignal, CloudShellError, Console, ConnectionState, TerminalSession,
};
use futures_util::{SinkExt, StreamExt};
use rstest::*;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use test_utils::*;

/// Local listener plus the ws:// URL pointing at it
#[fixture]
async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[rstest]
#[tokio::test]
async fn test_round_trip_until_peer_closes(#[future] listener: (TcpListener, String)) {
    let (listener, url) = listener.await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text("Welcome to Azure Cloud Shell\r\n".into()))
            .await
            .unwrap();

        let mut received = String::new();
        while !received.contains("exit\r") {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => received.push_str(text.as_str()),
                Some(Ok(_)) => {}
                other => panic!("Unexpected message: {:?}", other),
            }
        }

        ws.send(Message::Text("logout\r\n".into())).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "terminal exited".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        received
    });

    let output = SharedBuffer::default();
    let console = Console::new(
        Box::new(ScriptedInput::new(&["l", "s", "\r", "exit", "\r"])),
        Box::new(output.clone()),
    );
    let session = TerminalSession::new(test_config(), CancellationSignal::new());

    let report = tokio::time::timeout(Duration::from_secs(10), session.run(&url, console))
        .await
        .expect("session should end when the peer closes")
        .unwrap();

    let received = server.await.unwrap();
    assert_eq!(received, "ls\rexit\r");
    assert!(output.contents().starts_with("Welcome to Azure Cloud Shell\r\n"));
    assert!(output.contents().contains("logout"));

    assert_eq!(report.state, ConnectionState::Closed);
    assert_eq!(report.close_code, Some(1000));
    assert_eq!(report.close_reason, "terminal exited");
    assert!(report.is_clean());
    assert_eq!(session.state().connection(), ConnectionState::Closed);
    assert!(session.state().cancellation().is_cancelled());
}

#[rstest]
#[tokio::test]
async fn test_cancellation_closes_with_normal_status(#[future] listener: (TcpListener, String)) {
    let (listener, url) = listener.await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut close = None;
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Close(frame) = message {
                close = frame.map(|f| u16::from(f.code));
            }
        }
        close
    });

    let cancel = CancellationSignal::new();
    let session = TerminalSession::new(test_config(), cancel.clone());
    let mut states = session.state().subscribe();

    let canceller = tokio::spawn(async move {
        states
            .wait_for(|state| *state == ConnectionState::Open)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let console = Console::new(Box::new(ScriptedInput::silent()), Box::new(SharedBuffer::default()));
    let report = tokio::time::timeout(Duration::from_secs(5), session.run(&url, console))
        .await
        .expect("cancellation should end the session without deadlock")
        .unwrap();

    canceller.await.unwrap();
    assert_eq!(report.state, ConnectionState::Closed);
    assert_eq!(report.close_code, Some(1000));
    assert!(report.fault.is_none());
    assert_eq!(server.await.unwrap(), Some(1000));
}

#[rstest]
#[tokio::test]
async fn test_dropped_connection_is_reported_as_fault(#[future] listener: (TcpListener, String)) {
    let (listener, url) = listener.await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text("bye".into())).await.unwrap();
        // Drop the TCP connection without a close handshake
        drop(ws);
    });

    let output = SharedBuffer::default();
    let console = Console::new(Box::new(ScriptedInput::silent()), Box::new(output.clone()));
    let session = TerminalSession::new(test_config(), CancellationSignal::new());

    let report = tokio::time::timeout(Duration::from_secs(5), session.run(&url, console))
        .await
        .expect("a dropped connection should end the session")
        .unwrap();
    server.await.unwrap();

    assert_eq!(output.contents(), "bye");
    assert_eq!(report.state, ConnectionState::Closed);
    assert!(report.fault.is_some());
    assert!(matches!(
        report.clone().into_result(),
        Err(CloudShellError::TransportFault(_))
    ));
    assert!(report.to_string().contains("state: Closed"));
}

/// Poll `output` until it has something in it
async fn wait_for_output(output: &SharedBuffer) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let contents = output.contents();
            if !contents.is_empty() {
                return contents;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_default()
}

#[rstest]
#[case::ascii(&b"Hel"[..], &b"lo"[..], "Hel", "Hello")]
#[case::split_character(&b"price: \xE2\x82"[..], &b"\xAC5"[..], "price: ", "price: \u{20AC}5")]
#[tokio::test]
async fn test_fragment_is_written_before_message_completes(
    #[future] listener: (TcpListener, String),
    #[case] first: &'static [u8],
    #[case] rest: &'static [u8],
    #[case] expected_mid_message: &str,
    #[case] expected_final: &str,
) {
    let (listener, url) = listener.await;
    let output = SharedBuffer::default();

    let server = {
        let output = output.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            ws.send(Message::Frame(Frame::message(
                first.to_vec(),
                OpCode::Data(Data::Text),
                false,
            )))
            .await
            .unwrap();

            // The final fragment is held back until the first one is on screen
            let mid_message = wait_for_output(&output).await;

            ws.send(Message::Frame(Frame::message(
                rest.to_vec(),
                OpCode::Data(Data::Continue),
                true,
            )))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}

            mid_message
        })
    };

    let console = Console::new(Box::new(ScriptedInput::silent()), Box::new(output.clone()));
    let session = TerminalSession::new(test_config(), CancellationSignal::new());
    let report = tokio::time::timeout(Duration::from_secs(10), session.run(&url, console))
        .await
        .expect("session should end when the peer closes")
        .unwrap();

    assert_eq!(server.await.unwrap(), expected_mid_message);
    assert_eq!(output.contents(), expected_final);
    assert!(report.is_clean());
}

#[rstest]
#[tokio::test]
async fn test_console_failure_is_reported_as_fault(#[future] listener: (TcpListener, String)) {
    let (listener, url) = listener.await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let console = Console::new(Box::new(FailingInput), Box::new(SharedBuffer::default()));
    let session = TerminalSession::new(test_config(), CancellationSignal::new());

    let report = tokio::time::timeout(Duration::from_secs(5), session.run(&url, console))
        .await
        .expect("a dead console should end the session")
        .unwrap();
    server.await.unwrap();

    assert_eq!(report.state, ConnectionState::Closed);
    assert!(!report.is_clean());
    assert!(report.fault.as_deref().unwrap().contains("console detached"));
    assert!(matches!(
        report.into_result(),
        Err(CloudShellError::TransportFault(_))
    ));
}

#[rstest]
#[tokio::test]
async fn test_connect_failure_is_an_error() {
    // Bind and drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let session = TerminalSession::new(test_config(), CancellationSignal::new());
    let console = Console::new(Box::new(ScriptedInput::silent()), Box::new(SharedBuffer::default()));

    let result = session.run(&url, console).await;
    assert!(matches!(result, Err(CloudShellError::IoError(_))));
    assert_eq!(session.state().connection(), ConnectionState::Closed);
}

#[rstest]
#[tokio::test]
async fn test_cancelled_before_connect() {
    let cancel = CancellationSignal::new();
    cancel.cancel();
    let session = TerminalSession::new(test_config(), cancel);
    let console = Console::new(Box::new(ScriptedInput::silent()), Box::new(SharedBuffer::default()));

    let result = session.run("ws://127.0.0.1:9", console).await;
    assert!(matches!(result, Err(CloudShellError::OperationCancelled)));
}
