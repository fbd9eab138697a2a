use http::{Request, StatusCode};
use micro_rest::error::WebError;
use micro_rest::exception::mapper_fn;
use micro_rest::extract::Path;
use micro_rest::router::{get, Router};
use micro_rest::writer::MemoryWriter;
use micro_rest::{init_tracing, operation_fn, Failure, Pipeline, PipelineConfig, Reply, RequestBody, RequestContext};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

async fn hello_world() -> &'static str {
    "hello world"
}

async fn hello(Path(greeting): Path<Greeting>) -> Result<String, Failure> {
    if greeting.name.is_empty() || greeting.name == "nobody" {
        return Err(WebError::bad_request("who is there?").into());
    }
    Ok(format!("hello {}", greeting.name))
}

#[tokio::main]
async fn main() {
    let config = PipelineConfig::default();
    init_tracing(config.level().unwrap());

    let pipeline = Pipeline::builder()
        .routes(Router::builder().route("/", get(operation_fn(hello_world))).route("/hello/{name}", get(operation_fn(hello))))
        .mapper::<WebError, _>(
            1,
            mapper_fn(|failure: &Failure, ctx: &RequestContext| {
                Reply::text(format!("{failure} ({})", ctx.uri().path())).with_status(StatusCode::BAD_REQUEST)
            }),
        )
        .config(config)
        .build()
        .unwrap();

    for uri in ["/", "/hello/zava", "/hello/nobody", "/missing"] {
        let request = Request::builder().uri(uri).body(RequestBody::empty()).unwrap();
        let mut writer = MemoryWriter::new();
        let completion = pipeline.process(request, &mut writer, &CancellationToken::new()).await.unwrap();
        println!("{uri} -> {} {:?}", completion.status, writer.body());
    }
}
