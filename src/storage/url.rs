/// Builds the public URL of `key`.
///
/// An explicit base wins (`{base}/{bucket}/{key}`). Without one, path-style
/// endpoints give `{endpoint}/{bucket}/{key}` and virtual-host endpoints give
/// `{scheme}://{bucket}.{host}/{key}`.
pub fn public_url(
    endpoint: &str,
    public_url_base: Option<&str>,
    path_style: bool,
    bucket: &str,
    key: &str,
) -> String {
    let key = key.trim_start_matches('/');

    if let Some(base) = public_url_base {
        return format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key);
    }

    let endpoint = endpoint.trim_end_matches('/');
    if path_style {
        return format!("{}/{}/{}", endpoint, bucket, key);
    }

    match endpoint.split_once("://") {
        Some((scheme, host)) => format!("{}://{}.{}/{}", scheme, bucket, host, key),
        None => format!("https://{}.{}/{}", bucket, endpoint, key),
    }
}

/// Recovers the object key from a stored URL (absolute or relative).
///
/// Returns `None` for empty input or when nothing key-like remains.
pub fn key_from_url(url: &str, bucket: &str, public_url_base: Option<&str>) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let (candidate, relative) = match url.split_once("://") {
        None => (url.to_string(), true),
        Some((_, rest)) => {
            let base_match = public_url_base.and_then(|base| {
                let base = base.trim_end_matches('/');
                url.strip_prefix(&format!("{}/{}/", base, bucket))
                    .or_else(|| url.strip_prefix(&format!("{}/", base)))
            });

            let key = match base_match {
                Some(stripped) => stripped.to_string(),
                None => {
                    let path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
                    let segments: Vec<&str> = path.split('/').collect();
                    match segments.iter().position(|s| *s == bucket) {
                        Some(idx) => segments[idx + 1..].join("/"),
                        None => path.to_string(),
                    }
                }
            };
            (key, false)
        }
    };

    let candidate = candidate
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_start_matches('/');

    // a relative path may carry the bucket once; anything after it is the key
    let key = if relative {
        candidate
            .strip_prefix(&format!("{}/", bucket))
            .unwrap_or(candidate)
    } else {
        candidate
    };

    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}
