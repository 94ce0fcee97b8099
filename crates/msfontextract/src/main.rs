mod cli;

fn main() {
  pretty_env_logger::init();

  let cli = cli::parse();

  if let Err(error) = msfontextract::extract::run(&cli.into_options()) {
    eprintln!("error: {error}");
    std::process::exit(1);
  }
}
