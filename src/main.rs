use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(deepwork_lib::run());

    // A pending stdin read cannot be cancelled; don't let it hold up exit
    runtime.shutdown_timeout(Duration::from_millis(500));
    outcome
}
