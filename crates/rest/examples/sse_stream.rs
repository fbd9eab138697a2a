use http::Request;
use http_body_util::BodyExt;
use micro_rest::router::{get, Router};
use micro_rest::streaming::{sse_channel, Event, StreamingEmitter};
use micro_rest::{sync_fn, Pipeline, RequestBody};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ticks() -> StreamingEmitter {
    let (emitter, mut sender) = sse_channel(2);

    tokio::spawn(async move {
        for i in 0..5 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = sender.send(Event::from_data(format!("{i}"))).await;
        }

        let _ = sender.close().await;
    });

    emitter
}

#[tokio::main]
async fn main() {
    let pipeline =
        Arc::new(Pipeline::builder().routes(Router::builder().route("/sse", get(sync_fn(ticks)))).build().unwrap());

    let request = Request::builder().uri("/sse").body(RequestBody::empty()).unwrap();
    let response = pipeline.handle(request, CancellationToken::new()).await.unwrap();
    println!("{:?} {:?}", response.status(), response.headers());

    let mut body = response.into_body();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(chunk) = frame.data_ref() {
                    print!("{}", String::from_utf8_lossy(chunk));
                }
            }
            Err(e) => {
                eprintln!("stream aborted: {e}");
                break;
            }
        }
    }
}
