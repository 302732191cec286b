use url::Url;

/// How many offending resources are named in the log.
const SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossOriginReport {
    /// Resources that resolved to a URL at all.
    pub inspected: usize,
    pub cross_origin: Vec<String>,
}

impl CrossOriginReport {
    pub fn is_clean(&self) -> bool {
        self.cross_origin.is_empty()
    }
}

/// Compare every resource's origin with the document's.
///
/// Relative resources resolve against `document_url`. Anything that does
/// not parse is skipped rather than counted.
pub fn inspect_resources(document_url: &str, resources: &[String]) -> CrossOriginReport {
    let document = match Url::parse(document_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(document_url, "Cannot inspect resources, bad document URL: {}", e);
            return CrossOriginReport::default();
        },
    };
    let own_origin = document.origin();

    let mut report = CrossOriginReport::default();
    for resource in resources {
        let Ok(url) = document.join(resource) else {
            tracing::debug!(resource = %resource, "Skipping unparsable resource URL");
            continue;
        };
        report.inspected += 1;
        if url.origin() != own_origin {
            report.cross_origin.push(url.into());
        }
    }

    if report.is_clean() {
        tracing::info!(inspected = report.inspected, "No cross-origin resources detected");
    } else {
        tracing::warn!(
            "Found {} cross-origin resources that might affect isolation",
            report.cross_origin.len()
        );
        for (i, url) in report.cross_origin.iter().take(SAMPLE_SIZE).enumerate() {
            tracing::info!("Cross-origin resource {}: {}", i + 1, url);
        }
    }
    report
}
