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

use vkim_common::{logger::SessionKind, re::anyhow};
use vkim_config::Config;
use vkim_server::test_helpers::{pipeline_doubles, run_session, test_gateway};

/// run a session of `kind` and assert the output produced by vKIM is
/// `expected_output`
///
/// # Errors
///
/// * the outcome of the session
///
/// # Panics
///
/// * the output differs from `expected_output`
pub async fn test_session_inner(
    kind: SessionKind,
    config: Config,
    input: &[u8],
    expected_output: &[u8],
) -> anyhow::Result<()> {
    let gateway = test_gateway(config, pipeline_doubles());
    let (result, output) = run_session(kind, gateway.clone(), input).await;

    pretty_assertions::assert_eq!(
        std::str::from_utf8(expected_output),
        Ok(output.as_str())
    );
    assert!(gateway.loggers.is_empty(), "the session log was not removed");
    result
}

/// Call test_session_inner
#[macro_export]
macro_rules! test_session {
    (smtp, $input:expr, $output:expr) => {
        $crate::test_session! {
            smtp,
            with_config => vkim_config::Config::local_test(),
            $input,
            $output
        }
    };
    (pop3, $input:expr, $output:expr) => {
        $crate::test_session! {
            pop3,
            with_config => vkim_config::Config::local_test(),
            $input,
            $output
        }
    };
    (smtp, with_config => $config:expr, $input:expr, $output:expr) => {
        $crate::session::test_session_inner(
            vkim_common::logger::SessionKind::Smtp,
            $config,
            $input.as_bytes(),
            $output.as_bytes(),
        )
        .await
    };
    (pop3, with_config => $config:expr, $input:expr, $output:expr) => {
        $crate::session::test_session_inner(
            vkim_common::logger::SessionKind::Pop3,
            $config,
            $input.as_bytes(),
            $output.as_bytes(),
        )
        .await
    };
}
