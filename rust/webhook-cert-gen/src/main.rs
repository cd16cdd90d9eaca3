use clap::{crate_description, crate_version, Parser};
use stackable_operator::{
    cli::Command,
    logging::{self, TracingTarget},
    time::Duration,
    utils,
};
use webhook_cert_gen::{
    reconciler::{self, Targets},
    secret::SecretConfig,
};

pub const APP_NAME: &str = "webhook-cert-gen";
pub const ENV_VAR_LOGGING: &str = "WEBHOOK_CERT_GEN_LOG";

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<CertGenRun>,
}

#[derive(clap::Parser)]
struct CertGenRun {
    /// Name of the Secret that holds the webhook's certificate and key
    #[arg(long, env, default_value = "api-gateway-webhook-service")]
    secret_name: String,
    /// Namespace of both the Secret and the webhook Service
    #[arg(long, env, default_value = "cert-gen")]
    secret_namespace: String,
    /// Name of the Service that the webhook is reachable through
    #[arg(long, env, default_value = "api-gateway-webhook-service")]
    service_name: String,
    /// CustomResourceDefinition whose conversion webhook should trust the certificate
    #[arg(long, env, default_value = "apirules.gateway.kyma-project.io")]
    crd_name: String,
    /// Certificates expiring within this window are replaced
    #[arg(long, env, default_value = "10d")]
    rotation_lead_time: Duration,
    /// Lifetime of newly generated certificates
    #[arg(long, env, default_value = "365d")]
    certificate_lifetime: Duration,
    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,
}

impl CertGenRun {
    fn targets(&self) -> Targets {
        Targets {
            secret: SecretConfig {
                rotation_lead_time: self.rotation_lead_time,
                certificate_lifetime: self.certificate_lifetime,
                ..SecretConfig::new(
                    &self.secret_name,
                    &self.secret_namespace,
                    &self.service_name,
                )
            },
            crd_name: self.crd_name.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    if let Command::Run(run) = opts.cmd {
        logging::initialize_logging(ENV_VAR_LOGGING, APP_NAME, run.tracing_target);
        utils::print_startup_string(
            crate_description!(),
            crate_version!(),
            built_info::GIT_VERSION,
            built_info::TARGET,
            built_info::BUILT_TIME_UTC,
            built_info::RUSTC_VERSION,
        );

        let result = reconciler::run(&run.targets()).await;
        let message = reconciler::outcome_message(&result);
        match result {
            Ok(outcome) => tracing::info!(%outcome, "{message}"),
            Err(_) => anyhow::bail!(message),
        }
    }

    Ok(())
}
