use std::io::Write as _;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::json;

use hyperpost::middleware::{Compression, Forms};
use hyperpost::transport::mock::{MockResponse, MockTransport};
use hyperpost::{Blob, Client, ErrorKind, Form, Payload};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn client(transport: &MockTransport) -> Client {
    Client::builder()
        .with_transport(transport.clone())
        .with_middleware(Forms::new())
        .with_middleware(Compression::new())
        .build()
}

#[tokio::test]
async fn json_object_sets_content_type() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = MockTransport::permissive();

    let value = json!({"id": 7, "name": "widget"});
    client(&transport)
        .post("http://example.com/items")?
        .with_body(value.clone())?
        .await?;

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers[CONTENT_TYPE], "application/json");
    assert_eq!(sent.headers.get_all(CONTENT_TYPE).iter().count(), 1);
    assert_eq!(sent.body, serde_json::to_vec(&value)?);
    Ok(())
}

#[tokio::test]
async fn content_type_is_replaced_not_appended() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();

    let request = client(&transport)
        .put("http://example.com/items/7")?
        .with_header("content-type", "text/plain")?
        .with_body(json!({"a": 1}))?;

    // the same snapshot can be cloned and sent repeatedly
    request.clone().await?;
    request.await?;

    for sent in transport.requests() {
        let values: Vec<_> = sent.headers.get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values, ["application/json"]);
        assert_eq!(sent.text(), r#"{"a":1}"#);
    }
    Ok(())
}

#[tokio::test]
async fn json_array_elements_are_concatenated() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();

    client(&transport)
        .post("http://example.com/batch")?
        .with_body(json!([{"a": 1}, [2, 3], "four"]))?
        .await?;

    let sent = &transport.requests()[0];
    assert_eq!(sent.text(), r#"{"a":1}[2,3]"four""#);
    assert!(!sent.headers.contains_key(CONTENT_TYPE));
    Ok(())
}

#[tokio::test]
async fn json_scalars() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();
    let client = client(&transport);

    client
        .post("http://example.com/")?
        .with_body(json!("just text"))?
        .await?;
    client
        .post("http://example.com/")?
        .with_body(json!(12))?
        .await?;

    let sent = transport.requests();
    assert_eq!(sent[0].text(), "just text");
    assert!(sent[1].body.is_empty());
    Ok(())
}

#[tokio::test]
async fn multipart_form() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();

    let form = Form::new()
        .text("title", "report")
        .file("upload", "data.csv", "text/csv", "a,b\n1,2\n");
    let expected = form.encode();
    let content_type = form.content_type();

    client(&transport)
        .post("http://example.com/upload")?
        .with_body(form)?
        .await?;

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers[CONTENT_TYPE], content_type.as_str());
    assert_eq!(
        sent.headers[CONTENT_LENGTH],
        expected.len().to_string().as_str()
    );
    assert_eq!(sent.body, expected);

    let text = sent.text();
    assert!(text.contains("name=\"title\""));
    assert!(text.contains("filename=\"data.csv\""));
    Ok(())
}

#[tokio::test]
async fn forms_need_the_middleware() -> Result<(), BoxError> {
    let client = Client::builder()
        .with_transport(MockTransport::permissive())
        .build();

    let error = client
        .post("http://example.com/upload")?
        .with_body(Form::new().text("a", "b"))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MissingCapability);
    Ok(())
}

#[tokio::test]
async fn blob_bodies_send_raw_bytes() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();

    client(&transport)
        .post("http://example.com/")?
        .with_body(Blob::new(vec![0_u8, 1, 2, 255]).with_mime("application/octet-stream"))?
        .await?;

    assert_eq!(transport.requests()[0].body, &[0_u8, 1, 2, 255][..]);
    Ok(())
}

#[tokio::test]
async fn pending_body_is_awaited() -> Result<(), BoxError> {
    let transport = MockTransport::permissive();

    let payload = Payload::pending(async {
        tokio::task::yield_now().await;
        Payload::Json(json!({"late": true}))
    });

    client(&transport)
        .post("http://example.com/")?
        .with_body(payload)?
        .await?;

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers[CONTENT_TYPE], "application/json");
    assert_eq!(sent.text(), r#"{"late":true}"#);
    Ok(())
}

#[tokio::test]
async fn gzip_and_deflate_responses() -> Result<(), BoxError> {
    let text = "compressed response body ".repeat(8);

    let mut gzip = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gzip.write_all(text.as_bytes())?;
    let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    zlib.write_all(text.as_bytes())?;

    let transport = MockTransport::new()
        .route(
            "http://example.com/gzip",
            MockResponse::ok()
                .with_header("content-encoding", "gzip")
                .with_body(gzip.finish()?),
        )
        .route(
            "http://example.com/deflate",
            MockResponse::ok()
                .with_header("content-encoding", "deflate")
                .with_body(zlib.finish()?),
        );
    let client = client(&transport);

    for path in ["gzip", "deflate"] {
        let response = client
            .get(format!("http://example.com/{path}"))?
            .enable_compression()?
            .await?;
        assert_eq!(response.text().await?, text, "{path}");
    }

    for sent in transport.requests() {
        assert_eq!(sent.headers["accept-encoding"], "gzip, deflate");
    }
    Ok(())
}

#[tokio::test]
async fn compressed_body_left_alone_without_opt_in() -> Result<(), BoxError> {
    let transport = MockTransport::new().route(
        "http://example.com/",
        MockResponse::ok()
            .with_header("content-encoding", "gzip")
            .with_body("not really gzip"),
    );

    let response = client(&transport).get("http://example.com/")?.await?;
    assert_eq!(response.text().await?, "not really gzip");
    assert!(!transport.requests()[0]
        .headers
        .contains_key("accept-encoding"));
    Ok(())
}

#[tokio::test]
async fn always_on_compression() -> Result<(), BoxError> {
    let mut gzip = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gzip.write_all(b"always")?;

    let transport = MockTransport::new().route(
        "http://example.com/",
        MockResponse::ok()
            .with_header("content-encoding", "gzip")
            .with_body(gzip.finish()?),
    );
    let client = Client::builder()
        .with_transport(transport.clone())
        .with_middleware(Compression::always())
        .build();

    let response = client.get("http://example.com/")?.await?;
    assert_eq!(response.text().await?, "always");
    assert_eq!(transport.requests()[0].headers["accept-encoding"], "gzip, deflate");
    Ok(())
}

#[tokio::test]
async fn empty_compressed_bodies_are_not_decoded() -> Result<(), BoxError> {
    let transport = MockTransport::new()
        .route(
            "http://example.com/",
            MockResponse::ok().with_header("content-encoding", "gzip"),
        )
        .route(
            "http://example.com/gone",
            MockResponse::new(http::StatusCode::NO_CONTENT)
                .with_header("content-encoding", "deflate"),
        );
    let client = client(&transport);

    let response = client
        .head("http://example.com/")?
        .enable_compression()?
        .await?;
    assert_eq!(response.status(), 200);
    assert!(response.bytes().await?.is_empty());

    let response = client
        .delete("http://example.com/gone")?
        .enable_compression()?
        .await?;
    assert_eq!(response.status(), 204);
    assert!(response.bytes().await?.is_empty());
    Ok(())
}
