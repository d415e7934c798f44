//! Blocking RESP client implementing [`BackendConnection`].

use std::{
    io::{BufReader, Write},
    time::Duration,
};

use log::debug;

use super::{
    BackendConnection,
    config::SentinelAddr,
    error::ConnectionError,
    resp::{Reply, encode_command, read_reply},
    transport::{ActiveConnection, RedisTransport, TcpEndpoint, connect_transport},
};

/// Session preparation applied right after the socket opens.
#[derive(Clone, Debug, Default)]
pub struct SessionSetup<'a> {
    pub password: Option<&'a str>,
    pub database: u32,
}

/// One live connection to a Redis server.
pub struct RedisConnection {
    stream: BufReader<ActiveConnection>,
}

impl RedisConnection {
    /// Open `transport`, authenticate, select the database and verify the
    /// session with `PING`.
    pub fn open(
        transport: &RedisTransport,
        connect_timeout: Duration,
        io_timeout: Duration,
        setup: &SessionSetup<'_>,
    ) -> Result<Self, ConnectionError> {
        let socket = connect_transport(transport, connect_timeout)?;
        socket.set_io_timeout(io_timeout)?;
        let mut conn = Self {
            stream: BufReader::new(socket),
        };
        if let Some(password) = setup.password {
            conn.command(&["AUTH", password])?;
        }
        if setup.database != 0 {
            let database = setup.database.to_string();
            conn.command(&["SELECT", database.as_str()])?;
        }
        conn.ping()?;
        Ok(conn)
    }

    /// Send one command and wait for its reply.
    pub fn command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Reply, ConnectionError> {
        let frame = encode_command(args);
        let socket = self.stream.get_mut();
        socket.write_all(&frame)?;
        socket.flush()?;
        read_reply(&mut self.stream)?.into_result()
    }

    /// Check the session is usable.
    pub fn ping(&mut self) -> Result<(), ConnectionError> {
        match self.command(&["PING"])? {
            Reply::Status(status) if status == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }
}

impl BackendConnection for RedisConnection {
    fn rpush(&mut self, key: &str, values: &[String]) -> Result<(), ConnectionError> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(values.len() + 2);
        args.push(b"RPUSH");
        args.push(key.as_bytes());
        args.extend(values.iter().map(|v| v.as_bytes()));
        let reply = self.command(&args)?;
        let length = expect_integer("RPUSH", reply)?;
        debug!("RedisConnection: list '{key}' now holds {length} entries");
        Ok(())
    }

    fn publish(&mut self, channel: &str, message: &str) -> Result<(), ConnectionError> {
        let reply = self.command(&["PUBLISH", channel, message])?;
        expect_integer("PUBLISH", reply)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        let result = self.command(&["QUIT"]).map(|_| ());
        self.stream.get_mut().shutdown();
        result
    }
}

/// Ask each sentinel in turn for the current address of `master_name`.
///
/// Returns the first answer; unreachable or ignorant sentinels are skipped.
pub fn resolve_master(
    sentinels: &[SentinelAddr],
    master_name: &str,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<(String, u16), ConnectionError> {
    for sentinel in sentinels {
        match query_sentinel(sentinel, master_name, connect_timeout, io_timeout) {
            Ok(Some(addr)) => return Ok(addr),
            Ok(None) => debug!("RedisConnection: sentinel {sentinel} does not know '{master_name}'"),
            Err(err) => debug!("RedisConnection: sentinel {sentinel} unavailable: {err}"),
        }
    }
    Err(ConnectionError::MasterNotFound(master_name.to_owned()))
}

fn query_sentinel(
    sentinel: &SentinelAddr,
    master_name: &str,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<Option<(String, u16)>, ConnectionError> {
    let transport = RedisTransport::Tcp(TcpEndpoint {
        host: sentinel.host.clone(),
        port: sentinel.port,
        tls: None,
    });
    let socket = connect_transport(&transport, connect_timeout)?;
    socket.set_io_timeout(io_timeout)?;
    let mut conn = RedisConnection {
        stream: BufReader::new(socket),
    };
    let reply = conn.command(&["SENTINEL", "get-master-addr-by-name", master_name])?;
    let _ = conn.close();
    match reply {
        Reply::Array(None) | Reply::Bulk(None) => Ok(None),
        Reply::Array(Some(items)) if items.len() == 2 => {
            let host = items[0].as_text().map(str::to_owned);
            let port = items[1].as_text().and_then(|p| p.parse().ok());
            match (host, port) {
                (Some(host), Some(port)) => Ok(Some((host, port))),
                _ => Err(unexpected("SENTINEL get-master-addr-by-name", &items[0])),
            }
        }
        other => Err(unexpected("SENTINEL get-master-addr-by-name", &other)),
    }
}

fn expect_integer(command: &str, reply: Reply) -> Result<i64, ConnectionError> {
    match reply {
        Reply::Integer(value) => Ok(value),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &Reply) -> ConnectionError {
    ConnectionError::Protocol(format!("unexpected reply to {command}: {reply:?}"))
}
