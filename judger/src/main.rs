use ayame_judger::config::JudgerConfig;
use ayame_judger::judge;
use ayame_judger::mirrorfs::MirrorFs;
use ayame_judger::problem::SourceSpec;
use ayame_judger::report::{Stage, StatusReporter};
use ayame_judger::sandbox::LrunSandbox;
use clap::Parser;
use path_absolutize::Absolutize;

mod opt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = opt::Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut conf = match &opts.config {
        Some(path) => JudgerConfig::load(path)?,
        None => JudgerConfig::default(),
    };
    if let Some(dir) = opts.tempdir {
        conf.tmp_dir = dir;
    }
    if let Some(dir) = opts.langconf {
        conf.language_dir = dir;
    }
    if let Some(path) = opts.mirrorfs_conf {
        conf.mirror_fs_config = path;
    }
    if let Some(workers) = opts.thread {
        conf.max_workers = workers.max(1);
    }
    if let Some(host) = &opts.udp_host {
        conf.status_host = Some(host.clone());
    }

    let reporter = match &conf.status_host {
        Some(host) => StatusReporter::connect(host, opts.udp_uid.clone()),
        None => StatusReporter::noop(),
    };
    let sandbox = LrunSandbox::new(&conf.sandbox_bin);
    let root = MirrorFs::new(&conf.mirror_fs_bin, &conf.mirror_fs_config);

    // Judging moves between directories; relative inputs would silently
    // point elsewhere.
    let problem_dir = opts.problem.absolutize()?.into_owned();
    let source = opts.source.absolutize()?.into_owned();
    let code = SourceSpec {
        source: source.display().to_string(),
        language: opts.language.clone(),
        ..Default::default()
    };

    let result = judge::run(&conf, &code, &problem_dir, &sandbox, &root, &reporter).await?;
    reporter.report(Stage::Finished, 100);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
