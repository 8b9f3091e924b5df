// Listen for a debugging engine, break on the first line, and dump state.
//
// Point an engine at this host, e.g.:
//   php -dxdebug.mode=debug -dxdebug.client_port=9000 script.php

use anyhow::Result;
use dbgp_client::{ConnectionEvent, EngineStatus, Server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = Server::bind("0.0.0.0:9000").await?;
    println!("listening on {}", server.local_addr()?);

    let (conn, mut events) = server.accept().await?;
    println!(
        "engine connected: {} ({}), script {}",
        conn.init().appid,
        conn.init().language,
        conn.init().fileuri
    );

    let fileuri = conn.init().fileuri.clone();
    let mut bp = conn.create_breakpoint();
    bp.set_line_type(&fileuri, 1).await?;
    println!("breakpoint set with id {}", bp.id());
    conn.adopt_breakpoint(bp).await;

    conn.run().await?;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::StatusChange { old, new } => {
                println!("status: {} -> {}", old, new);
                match new {
                    EngineStatus::Break => {
                        let mut stack = conn.stack_get().await?;
                        for level in stack.levels() {
                            println!(
                                "  #{} {}:{} {}",
                                level.level, level.file_uri, level.line_no, level.function
                            );
                        }
                        if let Ok(level) = stack.get_level(0) {
                            for context in level.contexts_mut() {
                                let name = context.name.clone();
                                let properties = context.get_properties(&conn).await?;
                                println!("  {}: {} variables", name, properties.len());
                                for property in properties.values() {
                                    println!(
                                        "    {} ({}) = {}",
                                        property.full_name,
                                        property.ptype.name,
                                        property.data
                                    );
                                }
                            }
                        }
                        conn.run().await?;
                    }
                    EngineStatus::Stopped => break,
                    _ => {}
                }
            }
            ConnectionEvent::Stdout(data) => print!("{}", data),
            ConnectionEvent::Stderr(data) => eprint!("{}", data),
            ConnectionEvent::Connected(_) => {}
        }
    }

    println!("engine disconnected");
    Ok(())
}
