use std::net::SocketAddr;

const HUB_ADDR: &str = "HUB_ADDR";

pub fn get_addr(default: SocketAddr) -> SocketAddr {
    let addr_from_env = std::env::var(HUB_ADDR);
    addr_from_env.map_or(default, |res| res.parse().unwrap_or(default))
}

const HUB_TOKEN: &str = "HUB_TOKEN";

pub fn get_token() -> Option<String> {
    std::env::var(HUB_TOKEN).ok().filter(|token| !token.is_empty())
}

const WEBHOOK_SECRET: &str = "WEBHOOK_SECRET";

pub fn get_webhook_secret() -> Option<String> {
    std::env::var(WEBHOOK_SECRET)
        .ok()
        .filter(|secret| !secret.is_empty())
}
