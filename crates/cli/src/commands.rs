use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a join job described by a JSON file
    Run {
        #[arg(long, help = "Job file path")]
        job: String,

        #[arg(long, help = "Replace the output if it already exists")]
        overwrite: bool,

        #[arg(long, help = "Print the run summary as JSON")]
        json: bool,
    },
    /// Show the fields and record count of a table, or the tables of a container
    Inspect {
        /// File, directory, or `directory::table`
        path: String,

        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    Options {
        #[command(subcommand)]
        command: OptionsCommand,
    },
}

#[derive(Subcommand)]
pub enum OptionsCommand {
    /// Print every stored option
    Show,
    /// Store one option; the value is read as JSON, or as text when it is not JSON
    Set { key: String, value: String },
    /// Print where options are stored
    Path,
}
