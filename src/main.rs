mod cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let command_line_interface = cli::CommandLineInterface::load();
    command_line_interface.run()
}
