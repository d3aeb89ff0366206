use std::{sync::Arc, time::Duration};

use flight::{
    create_from_reader, render, render_to_writer, ChunkStatus, ClientManifest, DecodeOptions,
    EncodeOptions, FlightResult, StatusCode, Thenable, Value,
};
use tokio::net::{TcpListener, TcpStream};

/// Тест проверяет поток через настоящий TCP-сокет: корень приходит сразу,
/// а promise разрешается позже, когда сервер допишет строку.
#[tokio::test]
async fn test_stream_over_tcp() -> FlightResult<()> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;

    let later = Thenable::new();
    let server_later = later.clone();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await?;
        let request = render(
            Value::object([
                ("greeting", Value::from("hello")),
                ("later", server_later.into()),
            ]),
            Arc::new(ClientManifest::new()),
            EncodeOptions::default(),
        );
        render_to_writer(request, socket).await
    });

    let socket = TcpStream::connect(addr).await?;
    let (root, driver) = create_from_reader(socket, DecodeOptions::default());
    let client = tokio::spawn(driver.run());

    let value = tokio::time::timeout(Duration::from_secs(5), root)
        .await
        .expect("root should resolve")?;
    assert_eq!(value.get("greeting"), Some(&Value::from("hello")));

    let promise = value.get("later").and_then(Value::as_promise).unwrap().clone();
    assert!(!promise.is_settled());
    later.resolve(Value::Array(vec![Value::Int(1), Value::Int(2)]));

    let settled = tokio::time::timeout(Duration::from_secs(5), promise)
        .await
        .expect("promise should resolve")?;
    assert_eq!(settled, Value::Array(vec![Value::Int(1), Value::Int(2)]));

    let written = server.await.unwrap()?;
    assert!(written > 0);
    let session = client.await.unwrap()?;
    assert!(session.is_closed());
    assert_eq!(session.pending_count(), 0);
    Ok(())
}

/// Тест проверяет прерывание запроса: ожидающий promise получает ошибку,
/// а поток закрывается штатно.
#[tokio::test]
async fn test_abort_rejects_pending_on_the_other_side() -> FlightResult<()> {
    let (client, server) = tokio::io::duplex(1024);

    let never = Thenable::new();
    let request = render(
        Value::Array(vec![never.clone().into()]),
        Arc::new(ClientManifest::new()),
        EncodeOptions::default(),
    );
    let handle = request.handle();
    let writer = tokio::spawn(render_to_writer(request, server));

    let (root, driver) = create_from_reader(client, DecodeOptions::default());
    let reader = tokio::spawn(driver.run());

    let value = root.await?;
    let promise = value.as_array().unwrap()[0].as_promise().unwrap().clone();
    assert!(!promise.is_settled());

    handle.abort("client went away");
    assert!(handle.is_complete());

    let reason = promise.await.unwrap_err();
    assert!(reason.to_string().contains("client went away"));
    assert_eq!(reason.status_code(), StatusCode::UpstreamError);

    writer.await.unwrap()?;
    reader.await.unwrap()?;

    // Поздний resolve после прерывания ничего не пишет.
    assert!(never.resolve(Value::Null));
    Ok(())
}

/// Тест проверяет, что разорванный до корня поток отклоняет корень
/// `ConnectionClosed`.
#[tokio::test]
async fn test_empty_stream_closes_root() {
    let (client, server) = tokio::io::duplex(64);
    drop(server);

    let (root, driver) = create_from_reader(client, DecodeOptions::default());
    let session = driver.run().await.unwrap();
    assert_eq!(root.status(), ChunkStatus::Errored);
    assert_eq!(
        root.await.unwrap_err().status_code(),
        StatusCode::ConnectionClosed
    );
    assert!(session.fatal_error().is_none());
}
