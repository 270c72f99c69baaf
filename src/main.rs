use std::env;

use dauboard::app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    // Optional port argument, default 3000
    let mut port: u16 = 3000;
    if args.len() >= 2 {
        port = args[1].parse().unwrap_or(3000);
    }

    app::run(port).await?;

    Ok(())
}
