use echo_service::EchoBody;
use echo_service::body::{decode, decode_reader, encode};
use echo_service::common::spawn_test_server;
use echo_service::config::ServerConfig;
use echo_service::http::HttpEchoClient;
use proptest::prelude::*;

/// Path segments that need no percent-encoding
fn path_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._~-]{1,16}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: decoding an encoded body gives back the same body
    #[test]
    fn body_round_trip(
        method in "[A-Z]{1,10}",
        path in ".*",
        url in ".*",
        host in ".*",
        request in ".*",
    ) {
        let body = EchoBody::new(method, path, url, host, request);
        let encoded = encode(&body);

        prop_assert_eq!(decode(&encoded).map_err(|e| TestCaseError::fail(e.to_string()))?, body.clone());

        // Readers see the trailing newline the server appends
        let mut wire = encoded.to_vec();
        wire.push(b'\n');
        prop_assert_eq!(decode_reader(&wire[..]).map_err(|e| TestCaseError::fail(e.to_string()))?, body);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: concurrent clients each see only their own path
    #[test]
    fn concurrent_paths_are_isolated(segments in prop::collection::vec(path_segment(), 1..8)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(format!("Runtime setup failed: {e}")))?;

        runtime.block_on(async {
            let server = spawn_test_server(ServerConfig::default()).await
                .map_err(|e| TestCaseError::fail(format!("Server setup failed: {e}")))?;
            let addr = server.addr();

            let tasks: Vec<_> = segments
                .iter()
                .enumerate()
                .map(|(i, segment)| {
                    let path = format!("/{i}/{segment}");
                    tokio::spawn(async move {
                        let mut client = HttpEchoClient::connect(addr).await?;
                        let echoed = client.get(&path).await?.echo_body()?.path().to_string();
                        Ok::<_, echo_service::EchoError>((path, echoed))
                    })
                })
                .collect();

            for task in tasks {
                let (sent, echoed) = task
                    .await
                    .map_err(|e| TestCaseError::fail(format!("Client task failed: {e}")))?
                    .map_err(|e| TestCaseError::fail(format!("Echo failed: {e}")))?;
                prop_assert_eq!(sent, echoed);
            }

            server.shutdown().await
                .map_err(|e| TestCaseError::fail(format!("Shutdown failed: {e}")))?;
            Ok(())
        })?;
    }
}
