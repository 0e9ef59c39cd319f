pub mod auth;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgMatches, ColorChoice, Command,
};

pub const CMD_BOOTSTRAP_ADMIN: &str = "bootstrap-admin";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("carhub-auth")
        .about("CarHub authentication and authorization")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CARHUB_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("CARHUB_DSN")
                .global(true)
                .hide_env_values(true),
        )
        .subcommand(bootstrap_admin());

    let command = auth::with_args(command);
    logging::with_args(command)
}

/// Value of a global argument, whether it was given before or after the
/// subcommand. Presence is checked by the caller.
#[must_use]
pub fn global_value(matches: &ArgMatches, name: &str) -> Option<String> {
    matches
        .subcommand()
        .and_then(|(_, sub)| sub.get_one::<String>(name))
        .or_else(|| matches.get_one::<String>(name))
        .cloned()
}

fn bootstrap_admin() -> Command {
    Command::new(CMD_BOOTSTRAP_ADMIN)
        .about("Create the first super administrator and exit")
        .arg(
            Arg::new("display-name")
                .long("display-name")
                .help("Display name of the administrator")
                .env("CARHUB_BOOTSTRAP_DISPLAY_NAME")
                .default_value("Administrator"),
        )
        .arg(
            Arg::new("email")
                .long("email")
                .help("Email the administrator signs in with")
                .env("CARHUB_BOOTSTRAP_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .help("Initial password, at least 8 characters")
                .env("CARHUB_BOOTSTRAP_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}
