use colored::Colorize;
use crawldeck::commands::command_argument_builder;
use crawldeck::handlers::{
    client_config_from_args, handle_delete, handle_list, handle_rerun, handle_show, handle_submit,
    handle_ui, handle_watch, init_logging, print_banner,
};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let Some((name, primary_command)) = chosen_command.subcommand() else {
        // No subcommand provided, just show the banner
        return;
    };

    // The dashboard owns the terminal; log lines would scribble over it.
    if name != "ui" {
        init_logging(chosen_command.get_count("verbose"));
    }

    let config = match client_config_from_args(&chosen_command) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            std::process::exit(2);
        }
    };

    let result = match name {
        "submit" => handle_submit(config, primary_command).await,
        "list" => handle_list(config, primary_command).await,
        "show" => handle_show(config, primary_command).await,
        "delete" => handle_delete(config, primary_command).await,
        "rerun" => handle_rerun(config, primary_command).await,
        "watch" => handle_watch(config, primary_command).await,
        "ui" => handle_ui(config, primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
