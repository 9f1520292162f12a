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

use vkim::{Args, Commands};
use vkim_common::re::anyhow;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();
    let config = vkim::load_config(args.config.as_deref())?;

    if let Some(Commands::ConfigShow) = args.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _guard = vkim::logs::initialize(&config)?;
    let collaborators = vkim::offline_collaborators(&config)?;

    vkim::start(config, collaborators, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for the shutdown signal: {e}");
        }
    })
    .await
}
