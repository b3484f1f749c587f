use lambda_runtime::{LambdaEvent, service_fn};
use serde_json::Value;
use snapshot_gc::{APP_NAME, gc_snapshots, set_up_logger};
use std::error::Error;

type LambdaError = Box<dyn Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    // Once per process; warm invocations skip `main`.
    set_up_logger(APP_NAME, module_path!(), false)?;

    let func = service_fn(function);
    lambda_runtime::run(func).await?;
    Ok(())
}

async fn function(_event: LambdaEvent<Value>) -> Result<Value, LambdaError> {
    let report = gc_snapshots(false).await?;

    Ok(serde_json::to_value(report)?)
}
