//! Keep-alive accounting for persistent connections.
//!
//! A connection's reusability is decided entirely by the last response seen
//! on it: the HTTP version picks the default, `Connection` can override it,
//! and `Keep-Alive: timeout=T, max=N` bounds how long and how often the
//! connection may be reused.

use std::time::{Duration, SystemTime};

use http::{header, HeaderMap, Version};

/// Deadline applied when the server keeps the connection open but does not
/// say for how long.
pub(crate) const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(120);

/// The keep-alive state of one connection: a wall-clock deadline after which
/// it must not be reused, and an optional budget of remaining requests.
///
/// `None` in either field is the "unbounded" sentinel a fresh connection
/// starts with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAlive {
    pub(crate) deadline: Option<SystemTime>,
    pub(crate) max: Option<u64>,
}

impl KeepAlive {
    /// A record that never expires; the state of a connection before its
    /// first response.
    pub fn unlimited() -> KeepAlive {
        KeepAlive {
            deadline: None,
            max: None,
        }
    }

    /// The wall-clock instant after which the connection may not be reused,
    /// or `None` if no bound applies yet.
    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    /// Remaining requests the server is willing to serve, if bounded.
    pub fn remaining(&self) -> Option<u64> {
        self.max
    }

    /// Whether the connection may still carry a request at `now`.
    pub fn usable_at(&self, now: SystemTime) -> bool {
        if self.max == Some(0) {
            return false;
        }
        match self.deadline {
            Some(deadline) => now <= deadline,
            None => true,
        }
    }

    /// Consumes one request from the budget. Called once per dispatched
    /// request; reaching zero retires the connection at its next use.
    pub(crate) fn register_use(&mut self) {
        if let Some(max) = self.max.as_mut() {
            *max = max.saturating_sub(1);
        }
    }

    /// Computes the keep-alive state from a parsed response head.
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close; the `Connection`
    /// header overrides the default either way. `Keep-Alive` parameters are
    /// only honored when the connection stays open.
    pub fn from_response(now: SystemTime, version: Version, headers: &HeaderMap) -> KeepAlive {
        let mut keep = version != Version::HTTP_10;

        for value in headers.get_all(header::CONNECTION) {
            let Ok(value) = value.to_str() else { continue };
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    keep = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    keep = true;
                }
            }
        }

        if !keep {
            // Immediate retirement: reusable_at(now + anything) is false.
            return KeepAlive {
                deadline: Some(now),
                max: Some(0),
            };
        }

        let mut deadline = now + DEFAULT_KEEP_ALIVE;
        let mut max = None;

        if let Some(value) = headers.get(header::HeaderName::from_static("keep-alive")) {
            if let Ok(value) = value.to_str() {
                for param in value.split(',') {
                    let Some((name, val)) = param.split_once('=') else {
                        continue;
                    };
                    let (name, val) = (name.trim(), val.trim());
                    if name.eq_ignore_ascii_case("timeout") {
                        if let Ok(secs) = val.parse::<u64>() {
                            deadline = now + Duration::from_secs(secs);
                        }
                    } else if name.eq_ignore_ascii_case("max") {
                        if let Ok(n) = val.parse::<u64>() {
                            max = Some(n);
                        }
                    }
                }
            }
        }

        KeepAlive {
            deadline: Some(deadline),
            max,
        }
    }
}

impl Default for KeepAlive {
    fn default() -> KeepAlive {
        KeepAlive::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                header::HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        let now = SystemTime::now();
        let ka = KeepAlive::from_response(now, Version::HTTP_11, &HeaderMap::new());
        assert_eq!(ka.deadline, Some(now + DEFAULT_KEEP_ALIVE));
        assert_eq!(ka.max, None);
        assert!(ka.usable_at(now));
    }

    #[test]
    fn connection_close_retires_immediately() {
        let now = SystemTime::now();
        let ka = KeepAlive::from_response(now, Version::HTTP_11, &headers(&[("connection", "close")]));
        assert!(!ka.usable_at(now + Duration::from_millis(1)));
        assert_eq!(ka.max, Some(0));
    }

    #[test]
    fn keep_alive_parameters_apply() {
        let now = SystemTime::now();
        let ka = KeepAlive::from_response(
            now,
            Version::HTTP_11,
            &headers(&[("connection", "keep-alive"), ("keep-alive", "timeout=30, max=7")]),
        );
        assert_eq!(ka.deadline, Some(now + Duration::from_secs(30)));
        assert_eq!(ka.max, Some(7));
    }

    #[test]
    fn http10_defaults_to_close_but_can_opt_in() {
        let now = SystemTime::now();
        let ka = KeepAlive::from_response(now, Version::HTTP_10, &HeaderMap::new());
        assert!(!ka.usable_at(now + Duration::from_millis(1)));

        let ka = KeepAlive::from_response(
            now,
            Version::HTTP_10,
            &headers(&[("connection", "keep-alive")]),
        );
        assert!(ka.usable_at(now));
        assert_eq!(ka.deadline, Some(now + DEFAULT_KEEP_ALIVE));
    }

    #[test]
    fn budget_exhaustion_retires() {
        let now = SystemTime::now();
        let mut ka = KeepAlive::from_response(
            now,
            Version::HTTP_11,
            &headers(&[("keep-alive", "timeout=30, max=1")]),
        );
        assert!(ka.usable_at(now));
        ka.register_use();
        assert!(!ka.usable_at(now));
    }

    #[test]
    fn unlimited_never_expires() {
        let ka = KeepAlive::unlimited();
        assert!(ka.usable_at(SystemTime::now() + Duration::from_secs(86400)));
    }

    #[test]
    fn connection_list_last_token_wins() {
        let now = SystemTime::now();
        let ka = KeepAlive::from_response(
            now,
            Version::HTTP_11,
            &headers(&[("connection", "keep-alive, close")]),
        );
        assert!(!ka.usable_at(now + Duration::from_millis(1)));
    }
}
