use anyhow::{Context, Result};
use localstore_core::{QueryMethod, SqlValue};
use serde_json::Value as JsonValue;

use crate::{Settings, boot, shutdown};

fn parse_params(raw: Option<&str>) -> Result<Vec<SqlValue>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: JsonValue = serde_json::from_str(raw).context("params must be a JSON array")?;
    let JsonValue::Array(items) = value else {
        anyhow::bail!("params must be a JSON array");
    };
    Ok(items.iter().map(SqlValue::from_json).collect::<localstore_core::Result<Vec<_>>>()?)
}

pub(crate) async fn run(settings: &Settings, method: &str, sql: &str, params: Option<&str>) -> Result<()> {
    let method: QueryMethod = method.parse()?;
    let params = parse_params(params)?;

    let (coordinator, worker) = boot(settings)?;
    let outcome = match coordinator.ready().await {
        Ok(client) => {
            if let Some(notice) = coordinator.storage_status().and_then(|s| s.notification()) {
                eprintln!("warning: {notice}");
            }
            client.call(sql, params, method).await
        },
        Err(e) => Err(e),
    };

    shutdown(coordinator, worker).await?;
    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output.into_wire().rows)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        assert_eq!(
            parse_params(Some(r#"[1, 2.5, "a", null]"#)).unwrap(),
            vec![SqlValue::Integer(1), SqlValue::Real(2.5), SqlValue::from("a"), SqlValue::Null]
        );
        assert!(parse_params(Some("{}")).is_err());
        assert!(parse_params(Some("[true]")).is_err());
    }
}
