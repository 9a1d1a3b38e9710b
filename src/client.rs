// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Blocking daemon client shared by `gpufanctl` and `gpufan-tui`.

use crate::protocol::{self, Request, Response};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    pub fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    /// Send one request and wait for its response.
    pub fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Daemon closed the connection",
            ));
        }
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_request_response_over_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpufan.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let req: Request = protocol::decode(&line).unwrap();
            let resp = Response::Ok {
                message: format!("{req:?}"),
            };
            let mut stream = stream;
            stream
                .write_all(protocol::encode(&resp).unwrap().as_bytes())
                .unwrap();
        });

        let mut conn = Connection::connect(&path).unwrap();
        let resp = conn.send_request(&Request::SetAuto).unwrap();
        assert_eq!(
            resp,
            Response::Ok {
                message: "SetAuto".to_string()
            }
        );
        server.join().unwrap();

        // Server hung up after one exchange.
        assert!(conn.send_request(&Request::GetStatus).is_err());
    }
}
