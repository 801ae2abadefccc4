use clap::{Command, arg, command};
use crawldeck_api::config::{API_KEY_VAR, BASE_URL_VAR, TIMEOUT_VAR};
use std::path::PathBuf;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const SORT_FIELDS: [&str; 5] = ["created_at", "updated_at", "url", "status", "page_title"];

pub fn command_argument_builder() -> Command {
    Command::new("crawldeck")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("crawldeck")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" ... "Raise log verbosity (-v debug, -vv trace)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"base-url" <URL>)
                .required(false)
                .help("Base URL of the analysis service")
                .env(BASE_URL_VAR)
                .global(true),
        )
        .arg(
            arg!(--"api-key" <KEY>)
                .required(false)
                .help("API key sent with every request")
                .env(API_KEY_VAR)
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            arg!(--"timeout" <SECONDS>)
                .required(false)
                .help("Request timeout in seconds")
                .env(TIMEOUT_VAR)
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("30")
                .global(true),
        )
        .arg(
            arg!(--"user-agent" <AGENT>)
                .required(false)
                .help("User-Agent header sent with every request")
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("submit")
                .about("Submit one URL, or a file of URLs, for analysis")
                .arg(
                    arg!([URL])
                        .required(false)
                        .help("The URL to analyse")
                        .conflicts_with("file"),
                )
                .arg(
                    arg!(-f --"file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs to submit")
                        .value_parser(clap::value_parser!(PathBuf))
                        .conflicts_with("URL"),
                ),
        )
        .subcommand(
            list_arguments(command!("list").about("List analysed URLs, one page at a time")).arg(
                arg!(--"format" <FORMAT>)
                    .required(false)
                    .help("Output format: text, json")
                    .value_parser(["text", "json"])
                    .default_value("text"),
            ),
        )
        .subcommand(
            command!("show")
                .about("Show the analysis result of one URL")
                .arg(
                    arg!(<ID>)
                        .help("Record id")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("delete").about("Delete analysed URLs").arg(
                arg!(<ID> ... "Record ids to delete")
                    .value_parser(clap::value_parser!(u64)),
            ),
        )
        .subcommand(
            command!("rerun").about("Queue analysed URLs for another run").arg(
                arg!(<ID> ... "Record ids to re-run")
                    .value_parser(clap::value_parser!(u64)),
            ),
        )
        .subcommand(
            list_arguments(
                command!("watch").about("Keep a list page on screen and reprint it as it changes"),
            )
            .arg(
                arg!(-i --"interval" <SECONDS>)
                    .required(false)
                    .help("Polling interval in seconds")
                    .value_parser(clap::value_parser!(u64).range(1..))
                    .default_value("5"),
            ),
        )
        .subcommand(list_arguments(
            command!("ui").about("Open the interactive dashboard"),
        ))
}

/// Pagination, sort and filter flags shared by `list`, `watch` and `ui`.
fn list_arguments(cmd: Command) -> Command {
    cmd.arg(
        arg!(-l --"limit" <N>)
            .required(false)
            .help("Records per page")
            .value_parser(clap::value_parser!(u64).range(1..))
            .default_value("10"),
    )
    .arg(
        arg!(-o --"offset" <N>)
            .required(false)
            .help("Number of records to skip")
            .value_parser(clap::value_parser!(u64))
            .conflicts_with("page"),
    )
    .arg(
        arg!(-p --"page" <N>)
            .required(false)
            .help("Page number, starting at 1")
            .value_parser(clap::value_parser!(u64).range(1..))
            .conflicts_with("offset"),
    )
    .arg(
        arg!(-s --"sort" <FIELD>)
            .required(false)
            .help("Sort column")
            .value_parser(SORT_FIELDS)
            .default_value("created_at"),
    )
    .arg(
        arg!(--"desc")
            .required(false)
            .help("Sort descending")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        arg!(--"filter" <TEXT>)
            .required(false)
            .help("Only show records matching this text"),
    )
}
