/*
 * vKIM mail gateway
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

///
#[derive(clap::Parser)]
#[cfg_attr(test, derive(Debug, PartialEq, Eq))]
#[clap(about, version, author)]
pub struct Args {
    /// Path of the vKIM configuration file (toml format)
    #[clap(short, long)]
    pub config: Option<String>,

    ///
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

///
#[derive(clap::Subcommand)]
#[cfg_attr(test, derive(Debug, PartialEq, Eq))]
pub enum Commands {
    /// Show the loaded config (as serialized toml format)
    ConfigShow,
}

#[cfg(test)]
mod tests {
    use super::{Args, Commands};

    #[test]
    fn no_arguments() {
        pretty_assertions::assert_eq!(
            Args {
                config: None,
                command: None
            },
            <Args as clap::Parser>::try_parse_from(&[""]).unwrap()
        );
    }

    #[test]
    fn config() {
        pretty_assertions::assert_eq!(
            Args {
                config: Some("/etc/vkim/vkim.toml".to_string()),
                command: None
            },
            <Args as clap::Parser>::try_parse_from(&["", "-c", "/etc/vkim/vkim.toml"]).unwrap()
        );
    }

    #[test]
    fn config_show() {
        pretty_assertions::assert_eq!(
            Args {
                config: Some("vkim.toml".to_string()),
                command: Some(Commands::ConfigShow)
            },
            <Args as clap::Parser>::try_parse_from(&["", "--config", "vkim.toml", "config-show"])
                .unwrap()
        );
    }

    #[test]
    fn unknown_command() {
        assert!(<Args as clap::Parser>::try_parse_from(&["", "show"]).is_err());
    }
}
