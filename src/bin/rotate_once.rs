// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `rotate-once`: runs a single rotation tick against a signer, bundle, and
//! one target, then prints the resulting status. Not a full operator CLI —
//! no subcommands, no completions, no CRD generation. Useful for manual
//! recovery and for exercising the engine outside a reconcile loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;

use certrotate::config::RotationConfig;
use certrotate::context::RotationCtx;
use certrotate::events::{EventRecorder, KubeEventRecorder, TracingEventRecorder};
use certrotate::orchestrator::{sync, ReportingMode, RotationTask, TargetTask};
use certrotate::store::{InMemoryStore, KubeStore, RecordStore};
use certrotate::target::TargetKind;

#[derive(Debug, Clone, clap::ValueEnum)]
enum TargetKindArg {
    Serving,
    Client,
    Signer,
}

#[derive(Debug, Parser)]
#[command(name = "rotate-once", about = "Run a single certificate rotation tick")]
struct Args {
    /// Namespace the signer, bundle, and target records live in.
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Name of the signing CA record.
    #[arg(long, default_value = "rotation-signer")]
    signer_name: String,

    /// Name of the trust bundle record.
    #[arg(long, default_value = "rotation-bundle")]
    bundle_name: String,

    /// Name of the target record to ensure.
    #[arg(long, default_value = "rotation-target")]
    target_name: String,

    /// Kind of leaf certificate the target needs.
    #[arg(long, value_enum, default_value_t = TargetKindArg::Serving)]
    target_kind: TargetKindArg,

    /// Hostnames for a serving target (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "localhost")]
    hostnames: Vec<String>,

    /// Certificate validity window in seconds.
    #[arg(long, default_value_t = 86_400)]
    validity_seconds: u64,

    /// Run against an in-memory store instead of a real Kubernetes cluster.
    #[arg(long)]
    in_memory: bool,
}

fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
        }
    }
}

fn target_kind(arg: &TargetKindArg, hostnames: &[String]) -> TargetKind {
    match arg {
        TargetKindArg::Serving => TargetKind::Serving {
            hostnames: hostnames.to_vec(),
        },
        TargetKindArg::Client => TargetKind::Client {
            user: "rotate-once".to_string(),
            groups: vec!["system:authenticated".to_string()],
        },
        TargetKindArg::Signer => TargetKind::Signer {
            common_name: "rotate-once-sub-signer".to_string(),
            path_len: 0,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_logging();
    let args = Args::parse();

    let (store, events): (Arc<dyn RecordStore>, Arc<dyn EventRecorder>) = if args.in_memory {
        (Arc::new(InMemoryStore::new()), Arc::new(TracingEventRecorder))
    } else {
        let kube_config = kube::Config::infer().await.context("loading kubeconfig")?;
        let client = kube::Client::try_from(kube_config).context("building Kubernetes client")?;
        let reference = kube::api::ObjectReference {
            kind: Some("Secret".to_string()),
            namespace: Some(args.namespace.clone()),
            name: Some(args.signer_name.clone()),
            ..Default::default()
        };
        let recorder = KubeEventRecorder::new(client.clone(), "certrotate", reference);
        (Arc::new(KubeStore::new(client)), Arc::new(recorder))
    };

    let ctx = RotationCtx::new(store, events, "CertRotation");

    let config = RotationConfig::new(Duration::from_secs(args.validity_seconds));
    let target_config = config.clone();
    let task = RotationTask {
        namespace: &args.namespace,
        signer_name: &args.signer_name,
        bundle_name: &args.bundle_name,
        targets: vec![TargetTask {
            name: &args.target_name,
            kind: target_kind(&args.target_kind, &args.hostnames),
            config: &target_config,
        }],
        config: &config,
    };

    let cancel = ctx.child_token();
    let outcome = sync(
        ctx.store.as_ref(),
        &ctx.controller_name,
        &task,
        ReportingMode::RunOnce,
        ctx.events.as_ref(),
        &cancel,
    )
    .await
    .context("rotation tick failed")?;

    let status = serde_json::to_string_pretty(&outcome).context("serializing rotation status")?;
    println!("{status}");
    Ok(())
}
