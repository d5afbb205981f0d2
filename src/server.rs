use crate::error::Result;
use crate::oracle::{Oracle, OracleResult};
use num_bigint::BigUint;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// TCP endpoint answering padding queries, one thread per connection.
#[derive(Debug)]
pub struct OracleServer {
    listener: TcpListener,
    k: usize,
    response_len: usize,
    query_limit: Option<u64>,
}

impl OracleServer {
    pub fn bind(addr: impl ToSocketAddrs, k: usize) -> Result<Self> {
        Ok(OracleServer {
            listener: TcpListener::bind(addr)?,
            k,
            response_len: 1,
            query_limit: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Repeat the answer byte `len` times per query.
    pub fn with_response_len(mut self, len: usize) -> Self {
        self.response_len = len.max(1);
        self
    }

    /// Hang up on a client after it has sent `limit` queries.
    pub fn with_query_limit(mut self, limit: u64) -> Self {
        self.query_limit = Some(limit);
        self
    }

    /// Accepts connections until the listener fails. Every connection gets
    /// its own clone of `oracle`.
    pub fn serve<O>(self, oracle: O) -> Result<()>
    where
        O: Oracle + Clone + Send + 'static,
    {
        let port = self.local_addr()?.port();
        info!(port, "oracle server listening");
        for stream in self.listener.incoming() {
            let stream = stream?;
            let peer = stream.peer_addr().ok();
            debug!(port, ?peer, "client connected");
            let mut oracle = oracle.clone();
            let (k, response_len, limit) = (self.k, self.response_len, self.query_limit);
            thread::spawn(move || {
                match handle_connection(stream, &mut oracle, k, response_len, limit) {
                    Ok(queries) => debug!(port, ?peer, queries, "client disconnected"),
                    Err(e) => warn!(port, ?peer, error = %e, "connection error"),
                }
            });
        }
        Ok(())
    }

    pub fn spawn<O>(self, oracle: O) -> JoinHandle<Result<()>>
    where
        O: Oracle + Clone + Send + 'static,
    {
        thread::spawn(move || self.serve(oracle))
    }
}

fn handle_connection<O: Oracle>(
    mut stream: TcpStream,
    oracle: &mut O,
    k: usize,
    response_len: usize,
    limit: Option<u64>,
) -> io::Result<u64> {
    stream.set_nodelay(true)?;
    let mut request = vec![0u8; k];
    let mut queries = 0u64;
    while limit.map_or(true, |l| queries < l) {
        match stream.read_exact(&mut request) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        queries += 1;
        let answer = match oracle.query(&BigUint::from_bytes_be(&request)) {
            OracleResult::Conforming => 1u8,
            OracleResult::NotConforming | OracleResult::Rejected => 0u8,
            OracleResult::ConnectionLost => break,
        };
        stream.write_all(&vec![answer; response_len])?;
    }
    Ok(queries)
}
