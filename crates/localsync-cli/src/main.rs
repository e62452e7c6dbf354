//! # localsync CLI
//!
//! Stamp utilities and an in-process convergence demo.

mod config;

use anyhow::{anyhow, bail, Context, Result};
use config::CliConfig;
use localsync_core::{Crdt, Hlc, NestedValue, Schema, Stamp, Timestamp};
use localsync_sync::{Authority, AuthorityRuntime, ClientLink, ClientSession, MemoryStore, Store};
use serde_json::json;
use std::env;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

const DEMO_ID: &str = "recipe-1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "pack" => {
            if args.len() < 5 {
                eprintln!("Usage: localsync pack <physical_ms> <logical> <site>");
                std::process::exit(1);
            }
            let timestamp = Timestamp {
                physical_ms: args[2].parse().context("Invalid physical_ms")?,
                logical: args[3].parse().context("Invalid logical counter")?,
                site: args[4].clone(),
            };
            println!("{}", timestamp.pack());
        }
        "unpack" => {
            if args.len() < 3 {
                eprintln!("Usage: localsync unpack <stamp>");
                std::process::exit(1);
            }
            let timestamp = Stamp::from_packed(args[2].as_str())
                .unpack()
                .context("Failed to unpack stamp")?;
            println!("{}", serde_json::to_string_pretty(&timestamp)?);
        }
        "demo" => {
            let config = CliConfig::from_env().context("Failed to load configuration")?;
            run_demo(&config).await?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

type Doc = NestedValue;

fn recipe_schema() -> Result<Schema> {
    Schema::from_json(&json!({
        "type": "object",
        "attributes": {
            "title": "string",
            "body": "rich-text",
            "tags": "id-array"
        }
    }))
    .context("Invalid demo schema")
}

async fn deliver(link: &mut ClientLink<Doc>, session: &mut ClientSession<Doc>) -> Result<()> {
    let message = tokio::time::timeout(Duration::from_secs(5), link.inbox.recv())
        .await
        .context("Timed out waiting for the authority")?
        .context("Authority runtime stopped")?;
    session
        .handle_message(message)
        .with_context(|| format!("Session {} failed to apply server message", session.site()))
}

/// Two sessions edit one recipe concurrently and converge through the authority.
async fn run_demo(config: &CliConfig) -> Result<()> {
    let collection = config.collection.as_str();
    let schema = recipe_schema()?;

    let mut runtime = AuthorityRuntime::new(Authority::new(MemoryStore::<Doc>::new(), Hlc::new("authority")));
    let mut left_link = runtime.connect("left");
    let mut right_link = runtime.connect("right");
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(runtime.run(stop_rx));

    let mut left = ClientSession::new(config.session("left")).context("Failed to create left session")?;
    let mut right = ClientSession::new(config.session("right")).context("Failed to create right session")?;
    left.register_schema(collection, schema.clone());
    right.register_schema(collection, schema);

    left.collection(collection)
        .save(
            DEMO_ID,
            &json!({ "title": "Soup", "body": "Boil water.", "tags": ["dinner"] }),
        )
        .context("Failed to save recipe")?;
    left.flush(&mut left_link.transport)?;
    deliver(&mut right_link, &mut right).await?;
    tracing::info!(collection, id = DEMO_ID, "Recipe shared");

    left.collection(collection)
        .insert_text(DEMO_ID, &["body"], 11, " Add salt.")
        .context("Failed to edit body")?;
    let mut recipes = right.collection(collection);
    recipes
        .set_attribute(DEMO_ID, &["title"], &json!("Stew"))
        .context("Failed to retitle")?;
    recipes
        .delete_text(DEMO_ID, &["body"], 0, 5)
        .context("Failed to trim body")?;

    left.flush(&mut left_link.transport)?;
    right.flush(&mut right_link.transport)?;
    deliver(&mut right_link, &mut right).await?;
    deliver(&mut left_link, &mut left).await?;

    let left_value = left.collection(collection).load(DEMO_ID);
    let right_value = right.collection(collection).load(DEMO_ID);

    stop_tx
        .send(())
        .map_err(|()| anyhow!("Authority runtime already stopped"))?;
    let authority = handle.await.context("Authority runtime panicked")?;
    let stored = authority
        .store()
        .get(collection, DEMO_ID)?
        .and_then(|doc| doc.value());

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "left": left_value,
            "right": right_value,
            "authority": stored,
        }))?
    );

    if left_value != right_value || left_value != stored {
        bail!("Replicas diverged");
    }
    tracing::info!(collection, id = DEMO_ID, "Replicas converged");
    Ok(())
}

fn print_help() {
    println!(
        r#"localsync CLI

USAGE:
    localsync <COMMAND> [OPTIONS]

COMMANDS:
    pack <physical_ms> <logical> <site>  Pack clock state into a stamp
    unpack <stamp>                       Unpack a stamp into its components
    demo                                 Run two sessions against an in-process authority
    help                                 Show this help message

ENVIRONMENT:
    LOCALSYNC_SITE_ID        Site id prefix for demo sessions
    LOCALSYNC_MAX_DRIFT_MS   Clock drift bound in milliseconds
    LOCALSYNC_COLLECTION     Collection used by the demo (default: recipes)
    RUST_LOG                 Log filter (default: info)

EXAMPLES:
    localsync pack 1700000000000 3 laptop
    localsync unpack 001700000000000:0000003:laptop
"#
    );
}
