//! Minimal in-process RESP server for integration tests.
//!
//! Understands just enough of the protocol to exercise the writer: `PING`,
//! `AUTH`, `SELECT`, `RPUSH`, `PUBLISH`, `QUIT` and
//! `SENTINEL get-master-addr-by-name`. Every command received is recorded so
//! tests can assert on the exact wire traffic.

use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

/// Behaviour switches for a [`FakeRedis`] instance.
#[derive(Clone, Debug, Default)]
pub struct FakeRedisOptions {
    /// Require `AUTH` with this password before other commands.
    pub password: Option<String>,
    /// Answer sentinel queries for `(master_name, host, port)`.
    pub sentinel_for: Option<(String, String, u16)>,
}

#[derive(Default)]
struct State {
    commands: Mutex<Vec<Vec<String>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
    published: Mutex<Vec<(String, String)>>,
    clients: Mutex<Vec<TcpStream>>,
    connections: AtomicUsize,
    stopped: AtomicBool,
}

/// Handle to a running fake server; stops it on drop.
pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeRedis {
    pub fn start() -> Self {
        Self::start_with(FakeRedisOptions::default())
    }

    pub fn start_with(options: FakeRedisOptions) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake redis");
        Self::serve(listener, options)
    }

    /// Serve on an already bound listener.
    pub fn serve(listener: TcpListener, options: FakeRedisOptions) -> Self {
        let addr = listener.local_addr().expect("listener has address");
        let state = Arc::new(State::default());
        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_state.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                if let Ok(clone) = stream.try_clone() {
                    accept_state.clients.lock().expect("clients lock").push(clone);
                }
                let state = Arc::clone(&accept_state);
                let options = options.clone();
                thread::spawn(move || {
                    let _ = handle_client(stream, &state, &options);
                });
            }
        });
        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.commands.lock().expect("commands lock").clone()
    }

    /// Names of the commands received, upper-cased, in order.
    pub fn command_names(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|cmd| cmd.first().map(|name| name.to_ascii_uppercase()))
            .collect()
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.state
            .lists
            .lock()
            .expect("lists lock")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.published.lock().expect("published lock").clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Forcefully close every client connection opened so far.
    pub fn disconnect_all(&self) {
        for client in self.state.clients.lock().expect("clients lock").drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }

    /// Poll until `cond` holds or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration, mut cond: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond(self)
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.disconnect_all();
        let _ = TcpStream::connect(self.addr);
    }
}

fn handle_client(stream: TcpStream, state: &State, options: &FakeRedisOptions) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut authenticated = options.password.is_none();
    while let Some(command) = read_command(&mut reader)? {
        state
            .commands
            .lock()
            .expect("commands lock")
            .push(command.clone());
        let name = command[0].to_ascii_uppercase();
        let reply = match name.as_str() {
            "AUTH" => {
                if options.password.as_deref() == command.get(1).map(String::as_str) {
                    authenticated = true;
                    "+OK\r\n".to_owned()
                } else {
                    "-WRONGPASS invalid password\r\n".to_owned()
                }
            }
            _ if !authenticated => "-NOAUTH Authentication required.\r\n".to_owned(),
            "PING" => "+PONG\r\n".to_owned(),
            "SELECT" => "+OK\r\n".to_owned(),
            "RPUSH" => {
                let mut lists = state.lists.lock().expect("lists lock");
                let list = lists.entry(command[1].clone()).or_default();
                list.extend(command[2..].iter().cloned());
                format!(":{}\r\n", list.len())
            }
            "PUBLISH" => {
                state
                    .published
                    .lock()
                    .expect("published lock")
                    .push((command[1].clone(), command[2].clone()));
                ":1\r\n".to_owned()
            }
            "SENTINEL" => match &options.sentinel_for {
                Some((master, host, port)) if command.get(2) == Some(master) => {
                    let port = port.to_string();
                    format!(
                        "*2\r\n${}\r\n{host}\r\n${}\r\n{port}\r\n",
                        host.len(),
                        port.len()
                    )
                }
                _ => "*-1\r\n".to_owned(),
            },
            "QUIT" => {
                writer.write_all(b"+OK\r\n")?;
                return Ok(());
            }
            _ => format!("-ERR unknown command '{name}'\r\n"),
        };
        writer.write_all(reply.as_bytes())?;
        writer.flush()?;
    }
    Ok(())
}

fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches("\r\n").to_owned()))
}

fn read_command(reader: &mut impl BufRead) -> io::Result<Option<Vec<String>>> {
    let Some(header) = read_line(reader)? else {
        return Ok(None);
    };
    let count: usize = header
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected array header"))?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len_line = read_line(reader)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated command"))?;
        let len: usize = len_line
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected bulk header"))?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(String::from_utf8_lossy(&data).into_owned());
    }
    if args.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty command"));
    }
    Ok(Some(args))
}
