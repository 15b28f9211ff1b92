use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use caplink_core::{Invocation, LinkDefinition, Manifest, OutgoingRequest, ProviderKind};
use caplink_runtime::{Runtime, RuntimeConfig};
use clap::Subcommand;
use tokio::io::AsyncWriteExt;

#[derive(Subcommand)]
pub enum BlobOp {
    /// Print a blob to stdout
    Read { path: String },
    /// Store `--data` at a path
    Write {
        path: String,
        #[arg(long)]
        data: String,
    },
    /// Remove a blob
    Delete { path: String },
}

pub struct HttpArgs {
    pub method: String,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub uri: String,
}

async fn load(config: RuntimeConfig, manifest_path: &Path) -> Result<(Runtime, Manifest)> {
    let manifest = Manifest::from_file(manifest_path)
        .with_context(|| format!("failed to load manifest {}", manifest_path.display()))?;
    let runtime = Runtime::new(config);
    let generation = runtime
        .apply_manifest(&manifest)
        .await
        .with_context(|| format!("manifest {} is invalid", manifest_path.display()))?;
    tracing::info!(path = %manifest_path.display(), generation, "Runtime ready");
    Ok((runtime, manifest))
}

pub async fn check(config: RuntimeConfig, manifest_path: &Path, json: bool) -> Result<()> {
    let (runtime, manifest) = load(config, manifest_path).await?;
    let generation = runtime.registry().snapshot();
    let links: Vec<&LinkDefinition> = generation.links().collect();
    let providers: BTreeMap<&str, ProviderKind> = generation.providers().collect();

    if json {
        let report = serde_json::json!({
            "name": manifest.name,
            "version": manifest.version,
            "generation": generation.number(),
            "providers": providers,
            "links": links,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} {} (generation {})",
            manifest.name,
            manifest.version.as_deref().unwrap_or("-"),
            generation.number()
        );
        for (id, kind) in &providers {
            let replicas = if runtime.supervisor().tracks(id).await {
                format!(" replicas={}", runtime.supervisor().desired_count(id).await)
            } else {
                String::new()
            };
            println!("  provider {id} ({kind}){replicas}");
        }
        for component in &manifest.components {
            println!("  component {} replicas={}", component.id, component.replicas);
        }
        for link in &links {
            let values = link
                .values
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("  link {} {values}", link.key());
        }
    }

    runtime.shutdown().await;
    Ok(())
}

pub async fn blob(
    config: RuntimeConfig,
    manifest_path: &Path,
    component: &str,
    op: BlobOp,
) -> Result<()> {
    let (runtime, _) = load(config, manifest_path).await?;
    tracing::info!(component, "Running blob operation");

    let outcome = match op {
        BlobOp::Read { path } => match runtime.dispatch(Invocation::blob_read(component, &path)).await {
            Ok(reply) => {
                let bytes = reply.into_bytes().unwrap_or_default();
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
                Ok(())
            }
            Err(e) => Err::<(), _>(e).with_context(|| format!("read of '{path}' failed")),
        },
        BlobOp::Write { path, data } => runtime
            .dispatch(Invocation::blob_write(component, &path, data.into_bytes()))
            .await
            .map(|_| eprintln!("Wrote {path}"))
            .with_context(|| format!("write of '{path}' failed")),
        BlobOp::Delete { path } => runtime
            .dispatch(Invocation::blob_delete(component, &path))
            .await
            .map(|_| eprintln!("Deleted {path}"))
            .with_context(|| format!("delete of '{path}' failed")),
    };

    runtime.shutdown().await;
    outcome
}

pub async fn http(
    config: RuntimeConfig,
    manifest_path: &Path,
    component: &str,
    args: HttpArgs,
) -> Result<()> {
    let mut request = OutgoingRequest::new(args.method, args.uri);
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("header '{header}' is not in 'name: value' form");
        };
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = args.data {
        request = request.body(data.into_bytes());
    }

    let (runtime, _) = load(config, manifest_path).await?;
    tracing::info!(component, method = %request.method, uri = %request.uri, "Sending request");
    let outcome = send(&runtime, component, request).await;
    runtime.shutdown().await;
    tracing::info!(ok = outcome.is_ok(), "Request finished");
    outcome
}

async fn send(runtime: &Runtime, component: &str, request: OutgoingRequest) -> Result<()> {
    let uri = request.uri.clone();
    let reply = runtime
        .dispatch(Invocation::send_request(component, request))
        .await
        .with_context(|| format!("request to '{uri}' failed"))?;
    let Some(mut response) = reply.into_http() else {
        bail!("provider returned no HTTP response");
    };

    eprintln!("HTTP {}", response.status);
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = response.body.next_chunk().await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;
    Ok(())
}
