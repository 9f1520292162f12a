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

use crate::{
    execute_with,
    operation::{builtin::resolve_host, OperationResult},
    test_helpers::{collaborators, InMemoryConnector, InMemoryDirectory, StaticResolver},
    Operation, OperationContext, OperationRegistry,
};
use vkim_common::GatewayError;
use vkim_config::Config;

struct Echo(&'static str);

#[async_trait::async_trait]
impl Operation for Echo {
    fn vendor(&self) -> &str {
        "test"
    }

    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, mut context: OperationContext) -> OperationResult {
        match context.require::<String>(self.0, "input") {
            Ok(input) => {
                context.set(self.0, "output", input.to_uppercase());
                Ok(context)
            }
            Err(error) => Err((context, error)),
        }
    }
}

struct Panicking;

#[async_trait::async_trait]
impl Operation for Panicking {
    fn vendor(&self) -> &str {
        "test"
    }

    fn name(&self) -> &str {
        "Panicking"
    }

    async fn execute(&self, _: OperationContext) -> OperationResult {
        panic!("card removed")
    }
}

#[test]
fn context_typed_values() {
    let mut context = OperationContext::new();
    context.set("Step", "count", 3_u32);

    pretty_assertions::assert_eq!(context.get::<u32>("Step", "count"), Some(&3));
    pretty_assertions::assert_eq!(context.get::<u32>("Other", "count"), None);

    pretty_assertions::assert_eq!(context.take::<String>("Step", "count"), None);
    assert!(context.contains("Step", "count"));

    pretty_assertions::assert_eq!(context.take::<u32>("Step", "count"), Some(3));
    assert!(!context.contains("Step", "count"));

    assert!(matches!(
        context.require::<u32>("Step", "count"),
        Err(GatewayError::InvalidArgument(_))
    ));
}

#[test]
fn registry_lookup() {
    let registry = OperationRegistry::new(vec![
        std::sync::Arc::new(Echo("Upper")),
        std::sync::Arc::new(Echo("Lower")),
    ]);
    registry.validate().unwrap();
    pretty_assertions::assert_eq!(registry.keys(), vec!["test.Upper", "test.Lower"]);

    assert!(registry.get("test", "Upper").is_ok());
    assert!(matches!(
        registry.get("builtin", "Upper"),
        Err(GatewayError::NotFound { .. })
    ));
}

#[test]
fn registry_duplicated_key() {
    let registry = OperationRegistry::default()
        .with(std::sync::Arc::new(Echo("Upper")))
        .with(std::sync::Arc::new(Echo("Upper")));

    assert!(matches!(
        registry.get("test", "Upper"),
        Err(GatewayError::AmbiguousOperation { count: 2, .. })
    ));
    assert!(registry.validate().is_err());
}

#[test]
fn builtin_operations_are_unique() {
    let (collaborators, _, _) = collaborators(
        InMemoryDirectory::new(),
        InMemoryConnector::new("smcb", super::certificate(super::ALICE, 1, "1")),
        StaticResolver::new(),
    );
    let registry = OperationRegistry::builtin(&collaborators, &Config::local_test());

    registry.validate().unwrap();
    pretty_assertions::assert_eq!(
        registry.keys(),
        vec![
            "builtin.LoadCertificates",
            "builtin.DnsRequest",
            "builtin.CheckEncryptedFormat",
            "builtin.SendDsn",
        ]
    );
}

#[tokio::test]
async fn execute_ok() {
    let operation = Echo("Upper");
    let mut context = OperationContext::new();
    context.set("Upper", "input", "kim".to_string());

    let output = execute_with(
        &operation,
        context,
        |mut context| context.take::<String>("Upper", "output"),
        |_, _| None,
    )
    .await;
    pretty_assertions::assert_eq!(output.as_deref(), Some("KIM"));
}

#[tokio::test]
async fn execute_fail_hands_back_the_context() {
    let operation = Echo("Upper");
    let mut context = OperationContext::new();
    context.set("Upper", "unrelated", 1_u8);

    let kept = execute_with(
        &operation,
        context,
        |_| panic!("the operation must fail"),
        |context, error| {
            assert!(matches!(error, GatewayError::InvalidArgument(_)));
            context.and_then(|context| context.get::<u8>("Upper", "unrelated").copied())
        },
    )
    .await;
    pretty_assertions::assert_eq!(kept, Some(1));
}

#[tokio::test]
async fn execute_panic_is_a_failure() {
    let calls = std::sync::atomic::AtomicUsize::new(0);

    let context_lost = execute_with(
        &Panicking,
        OperationContext::new(),
        |_| false,
        |context, error| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            assert!(error.to_string().contains("card removed"));
            context.is_none()
        },
    )
    .await;

    assert!(context_lost);
    pretty_assertions::assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dns_request() {
    let (collaborators, _, _) = collaborators(
        InMemoryDirectory::new(),
        InMemoryConnector::new("smcb", super::certificate(super::ALICE, 1, "1")),
        StaticResolver::new().with_record("mail.kim.de", std::net::Ipv4Addr::new(10, 0, 0, 7)),
    );
    let registry = OperationRegistry::builtin(&collaborators, &Config::local_test());

    pretty_assertions::assert_eq!(
        resolve_host(&registry, "mail.kim.de").await.unwrap(),
        Some(std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 7)))
    );
    pretty_assertions::assert_eq!(resolve_host(&registry, "unknown.kim.de").await.unwrap(), None);
    pretty_assertions::assert_eq!(
        resolve_host(&registry, "[192.168.1.2]").await.unwrap(),
        Some("192.168.1.2".parse().unwrap())
    );
}

#[tokio::test]
async fn dns_request_transport_error() {
    let (collaborators, _, _) = collaborators(
        InMemoryDirectory::new(),
        InMemoryConnector::new("smcb", super::certificate(super::ALICE, 1, "1")),
        StaticResolver::new().failing(),
    );
    let registry = OperationRegistry::builtin(&collaborators, &Config::local_test());

    assert!(resolve_host(&registry, "mail.kim.de").await.is_err());
}

#[tokio::test]
async fn unregistered_operation() {
    let registry = OperationRegistry::default();
    assert!(matches!(
        resolve_host(&registry, "mail.kim.de").await,
        Err(GatewayError::NotFound { .. })
    ));
}
