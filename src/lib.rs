pub mod auth;
pub mod config;

use crate::{
    auth::StaticAuthenticator,
    config::Config,
};

use std::io::{Read, Write};

use codec::TypeRegistry;
use service::{
    Service, ServiceOptions,
    acl::{Acl, RuleOp, RuleType},
    reflect::{FunctionReflection, Param},
};

/// Build the gateway engine from a loaded configuration: alias map, ACL
/// and the static account list.
pub fn build_service(config: &Config) -> anyhow::Result<Service<StaticAuthenticator>> {
    let mut registry = TypeRegistry::default();
    for (alias, class) in &config.aliases {
        registry.set_mapping(alias, class);
    }

    let gateway = Service::new(ServiceOptions {
        authenticator: StaticAuthenticator::new(config.users.clone()),
        registry,
        production: config.gateway.production,
        loader: None,
    });

    if config.acl.enabled {
        gateway.set_acl(build_acl(config)?);
    }

    Ok(gateway)
}

fn build_acl(config: &Config) -> anyhow::Result<Acl> {
    let mut acl = Acl::new();

    for role in &config.acl.roles {
        let parents: Vec<&str> = role.parents.iter().map(String::as_str).collect();
        acl.add_role(&role.id, &parents)?;
    }

    for resource in &config.acl.resources {
        acl.add_resource(&resource.id, resource.parent.as_deref())?;
    }

    for rule in &config.acl.rules {
        let kind = match rule.kind {
            config::RuleKind::Allow => RuleType::Allow,
            config::RuleKind::Deny => RuleType::Deny,
        };

        let roles: Option<Vec<&str>> = rule
            .roles
            .as_ref()
            .map(|it| it.iter().map(String::as_str).collect());
        let resources: Option<Vec<&str>> = rule
            .resources
            .as_ref()
            .map(|it| it.iter().map(String::as_str).collect());
        let privileges: Option<Vec<&str>> = rule
            .privileges
            .as_ref()
            .map(|it| it.iter().map(String::as_str).collect());

        acl.set_rule(
            RuleOp::Add,
            kind,
            roles.as_deref(),
            resources.as_deref(),
            privileges.as_deref(),
            None,
        )?;
    }

    Ok(acl)
}

/// Built-in diagnostics namespace, mirroring the echo service classic
/// gateways ship for connectivity checks.
pub fn register_builtins(gateway: &Service<StaticAuthenticator>) -> anyhow::Result<()> {
    gateway.register_function(
        FunctionReflection::new("echo", vec![vec![Param::new("value")]], |args| {
            Ok(args.first().cloned().unwrap_or(codec::Value::Null))
        }),
        Some("system"),
    )?;

    Ok(())
}

/// Run one request/response cycle over stdio.
///
/// The gateway is deployed process-per-request behind the web server:
/// the raw POST body arrives on stdin and the response envelope leaves
/// on stdout. Transport concerns stay with the web server.
pub fn gateway_main(config: &Config) -> anyhow::Result<()> {
    let gateway = build_service(config)?;
    register_builtins(&gateway)?;

    let mut request = Vec::new();
    std::io::stdin().read_to_end(&mut request)?;

    let response = gateway.serve(&request)?;
    std::io::stdout().write_all(&response)?;

    Ok(())
}
