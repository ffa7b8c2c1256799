//! Command execution.

use crate::Commands;
use colored::Colorize;
use dubbo_invoke_client::{
    parse_parameters, parse_type_hints, ClientContext, Invocation, InvocationResult,
    ServiceAddress,
};
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(
    ctx: &ClientContext,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::Classify { .. } => unreachable!(),

        Commands::Invoke {
            service,
            method,
            params,
            types,
            version,
            group,
        } => {
            let params = params.map(|p| read_arg(&p)).transpose()?;
            let call = InvokeArgs {
                service: &service,
                method: &method,
                params: params.as_deref().unwrap_or(""),
                types: &types,
                version: version.as_deref(),
                group: group.as_deref(),
            };
            invoke(ctx, call).await
        }

        Commands::Test { service } => {
            let target = ctx.resolve(&service, None)?;
            if ctx.test_connection(&service, None).await {
                Ok(format!("{} {}", "Reachable".green(), target.address()))
            } else {
                Err(format!("{} is not reachable", target.address()).into())
            }
        }
    }
}

/// Arguments of one invocation, as typed by the user.
pub struct InvokeArgs<'a> {
    pub service: &'a str,
    pub method: &'a str,
    pub params: &'a str,
    pub types: &'a str,
    pub version: Option<&'a str>,
    pub group: Option<&'a str>,
}

/// Invokes a method; a failure carries the JSON failure envelope.
pub async fn invoke(
    ctx: &ClientContext,
    args: InvokeArgs<'_>,
) -> Result<String, Box<dyn std::error::Error>> {
    let hints = parse_type_hints(args.types);
    let mut invocation = match parse_parameters(args.params, &hints) {
        Ok(parameters) => Invocation::new(args.service, args.method).with_parameters(parameters),
        Err(err) => return Err(format_json(&InvocationResult::from(err).to_json()).into()),
    };
    if let Some(version) = args.version {
        invocation = invocation.with_version(version);
    }
    if let Some(group) = args.group {
        invocation = invocation.with_group(group);
    }

    let result = ctx.invoke(&invocation).await;
    let json = format_json(&result.to_json());
    if result.is_success() {
        Ok(json)
    } else {
        Err(json.into())
    }
}

/// Describes how an address is classified.
pub fn classify(address: &str) -> Result<String, Box<dyn std::error::Error>> {
    let classified = ServiceAddress::classify(address)?;
    let kind = match &classified {
        ServiceAddress::Direct { .. } => "direct".to_string(),
        ServiceAddress::Registry { scheme, .. } => format!("registry ({})", scheme),
    };
    Ok(format!(
        "{}\n  Type: {}\n  Normalized: {}",
        address.cyan(),
        kind.yellow(),
        classified.normalized()
    ))
}

/// Reads an argument inline or from `@file`.
fn read_arg(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(arg.to_string()),
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_output() {
        colored::control::set_override(false);
        let output = classify("nacos://10.0.0.2").unwrap();
        assert!(output.contains("registry (nacos)"));
        assert!(output.contains("nacos://10.0.0.2:8848"));

        let output = classify("10.0.0.1").unwrap();
        assert!(output.contains("direct"));
        assert!(classify("etcd://10.0.0.1").is_err());
    }

    #[test]
    fn test_read_arg_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert_eq!(read_arg(&format!("@{}", path.display())).unwrap(), "[1, 2]");
        assert_eq!(read_arg("[3]").unwrap(), "[3]");
    }
}
