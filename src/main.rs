mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;
mod reconcile;
mod storage;

fn main() {
    let env_file = env_loader::load_dotenv();
    logging::init();
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
