use crate::error::{Error, Result};
use crate::key::modulus_len;
use crate::math::to_bytes_be_padded;
use num_bigint::BigUint;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Answer to a single padding-oracle query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleResult {
    Conforming,
    NotConforming,
    ConnectionLost,
    /// The ciphertext does not fit the request. Nothing was sent.
    Rejected,
}

impl OracleResult {
    pub fn conforming(self) -> Result<bool> {
        match self {
            OracleResult::Conforming => Ok(true),
            OracleResult::NotConforming => Ok(false),
            OracleResult::ConnectionLost => Err(Error::OracleClosed),
            OracleResult::Rejected => Err(Error::OversizedCiphertext),
        }
    }
}

impl From<bool> for OracleResult {
    fn from(conforming: bool) -> Self {
        if conforming {
            OracleResult::Conforming
        } else {
            OracleResult::NotConforming
        }
    }
}

/// Anything that can tell whether a ciphertext decrypts to `0x00 0x02 ...`.
pub trait Oracle {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        (**self).query(ciphertext)
    }
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        (**self).query(ciphertext)
    }
}

/// Adapts a plain predicate into an oracle that never disconnects.
#[derive(Debug, Clone)]
pub struct FnOracle<F>(pub F);

impl<F: FnMut(&BigUint) -> bool> Oracle for FnOracle<F> {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        (self.0)(ciphertext).into()
    }
}

/// `true` when the `k`-byte encoding of `msg` starts with `0x00 0x02`.
pub fn begins_pkcs15(msg: &BigUint, k: usize) -> bool {
    let bs = msg.to_bytes_be();
    k >= 2 && bs.len() == k - 1 && bs[0] == 2
}

/// Exact oracle backed by the private exponent.
#[derive(Debug, Clone)]
pub struct PrivateKeyOracle {
    n: BigUint,
    d: BigUint,
    k: usize,
}

impl PrivateKeyOracle {
    pub fn new(n: BigUint, d: BigUint) -> Self {
        let k = modulus_len(&n);
        PrivateKeyOracle { n, d, k }
    }

    pub fn is_conforming(&self, ciphertext: &BigUint) -> bool {
        ciphertext < &self.n && begins_pkcs15(&ciphertext.modpow(&self.d, &self.n), self.k)
    }

    pub fn modulus_len(&self) -> usize {
        self.k
    }
}

impl Oracle for PrivateKeyOracle {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        self.is_conforming(ciphertext).into()
    }
}

/// One long-lived TCP connection to a remote padding oracle.
///
/// Each query writes the ciphertext as exactly `k` big-endian bytes and reads
/// `response_len` bytes back, of which only the first one is significant:
/// `0x01` means conforming. A zero-length read means the peer is gone.
#[derive(Debug)]
pub struct TcpOracle {
    stream: TcpStream,
    k: usize,
    response: Vec<u8>,
}

impl TcpOracle {
    pub fn connect(addr: impl ToSocketAddrs, k: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, k)
    }

    pub fn from_stream(stream: TcpStream, k: usize) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpOracle {
            stream,
            k,
            response: vec![0; 1],
        })
    }

    /// Number of bytes the server sends per answer.
    pub fn with_response_len(mut self, len: usize) -> Self {
        self.response = vec![0; len.max(1)];
        self
    }

    fn exchange(&mut self, request: &[u8]) -> io::Result<bool> {
        self.stream.write_all(request)?;
        let mut read = 0;
        while read < self.response.len() {
            match self.stream.read(&mut self.response[read..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(self.response[0] == 1)
    }
}

impl Oracle for TcpOracle {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        let request = to_bytes_be_padded(ciphertext, self.k);
        if request.len() != self.k {
            debug!(bytes = request.len(), k = self.k, "ciphertext wider than the modulus");
            return OracleResult::Rejected;
        }
        match self.exchange(&request) {
            Ok(conforming) => conforming.into(),
            Err(e) => {
                debug!(peer = ?self.stream.peer_addr().ok(), error = %e, "oracle connection lost");
                OracleResult::ConnectionLost
            }
        }
    }
}
