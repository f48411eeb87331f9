fn main() -> anyhow::Result<()> {
    annoroute::cli::run_cli()
}
