//! Handshake cookies.
//!
//! A connecting peer is challenged with a random 32-byte cookie it must
//! sign with its node key. Cookies expire quickly and are capped per IP so
//! a flood of half-open handshakes cannot pin memory.

use lattice_crypto::verify_signature;
use lattice_types::{Account, Signature};
use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outstanding cookies allowed per source IP.
const MAX_COOKIES_PER_IP: usize = 32;

struct Cookie {
    value: [u8; 32],
    created: Instant,
}

struct CookieState {
    cookies: HashMap<SocketAddrV6, Cookie>,
    per_ip: HashMap<Ipv6Addr, usize>,
}

pub struct SynCookies {
    cutoff: Duration,
    state: Mutex<CookieState>,
}

impl SynCookies {
    pub fn new(cutoff: Duration) -> Self {
        Self {
            cutoff,
            state: Mutex::new(CookieState {
                cookies: HashMap::new(),
                per_ip: HashMap::new(),
            }),
        }
    }

    /// Issue a cookie for `endpoint`, or `None` when its IP is at cap or
    /// one is already outstanding.
    pub fn assign(&self, endpoint: SocketAddrV6) -> Option<[u8; 32]> {
        let mut state = self.state.lock().unwrap();
        if state.cookies.contains_key(&endpoint) {
            return None;
        }
        let ip_count = state.per_ip.get(endpoint.ip()).copied().unwrap_or(0);
        if ip_count >= MAX_COOKIES_PER_IP {
            return None;
        }
        let mut value = [0u8; 32];
        getrandom::getrandom(&mut value).ok()?;
        state.cookies.insert(
            endpoint,
            Cookie {
                value,
                created: Instant::now(),
            },
        );
        *state.per_ip.entry(*endpoint.ip()).or_insert(0) += 1;
        Some(value)
    }

    /// Check a handshake response: the claimed node id must have signed our
    /// cookie. Consumes the cookie either way.
    pub fn validate(
        &self,
        endpoint: SocketAddrV6,
        node_id: &Account,
        signature: &Signature,
    ) -> bool {
        let cookie = {
            let mut state = self.state.lock().unwrap();
            let Some(cookie) = state.cookies.remove(&endpoint) else {
                return false;
            };
            if let Some(count) = state.per_ip.get_mut(endpoint.ip()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_ip.remove(endpoint.ip());
                }
            }
            cookie
        };
        if cookie.created.elapsed() > self.cutoff {
            return false;
        }
        verify_signature(&cookie.value, signature, node_id.as_bytes())
    }

    /// Drop expired cookies.
    pub fn purge(&self) {
        let mut state = self.state.lock().unwrap();
        let cutoff = self.cutoff;
        let expired: Vec<SocketAddrV6> = state
            .cookies
            .iter()
            .filter(|(_, cookie)| cookie.created.elapsed() > cutoff)
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in expired {
            state.cookies.remove(&endpoint);
            if let Some(count) = state.per_ip.get_mut(endpoint.ip()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_ip.remove(endpoint.ip());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
