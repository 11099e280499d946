//! Control dispatcher.
//!
//! The dispatcher is the surface external callers use: five control
//! commands that each carry a fixed [`CommandRecord`], plus the mapping hook.
//! It resolves the calling task, copies the record out of caller memory,
//! and relays the registry's result.

use crate::error::{Error, Result};
use crate::identity::TaskIdentity;
use crate::ids::{ContainerId, ObjectId, TaskId};
use crate::memory::Mapping;
use crate::observability::{span_operation, trace_failure, trace_snapshot};
use crate::registry::Registry;
use std::sync::Arc;

/// The command record exchanged on every control call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CommandRecord {
    /// Container ID.
    pub cid: u64,
    /// Object ID.
    pub oid: u64,
}

impl CommandRecord {
    /// Size of the record in caller memory.
    pub const SIZE: usize = std::mem::size_of::<CommandRecord>();

    /// Create a record.
    pub const fn new(cid: u64, oid: u64) -> Self {
        Self { cid, oid }
    }

    /// Decode a record laid out in native byte order.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut cid = [0u8; 8];
        let mut oid = [0u8; 8];
        cid.copy_from_slice(&bytes[..8]);
        oid.copy_from_slice(&bytes[8..]);
        Self {
            cid: u64::from_ne_bytes(cid),
            oid: u64::from_ne_bytes(oid),
        }
    }

    /// Encode the record in native byte order.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..8].copy_from_slice(&self.cid.to_ne_bytes());
        bytes[8..].copy_from_slice(&self.oid.to_ne_bytes());
        bytes
    }
}

/// Memory of the calling task from which command records are copied.
pub trait CallerMemory {
    /// Fill `dst` from caller memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransferFault`] if the bytes cannot be copied.
    fn copy_from_caller(&self, dst: &mut [u8]) -> Result<()>;
}

impl CallerMemory for [u8] {
    fn copy_from_caller(&self, dst: &mut [u8]) -> Result<()> {
        let src = self.get(..dst.len()).ok_or(Error::TransferFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl<const N: usize> CallerMemory for [u8; N] {
    fn copy_from_caller(&self, dst: &mut [u8]) -> Result<()> {
        self.as_slice().copy_from_caller(dst)
    }
}

impl CallerMemory for CommandRecord {
    fn copy_from_caller(&self, dst: &mut [u8]) -> Result<()> {
        self.to_bytes().copy_from_caller(dst)
    }
}

/// Copy a command record out of caller memory.
pub fn read_command<M: CallerMemory + ?Sized>(arg: &M) -> Result<CommandRecord> {
    let mut bytes = [0u8; CommandRecord::SIZE];
    arg.copy_from_caller(&mut bytes)?;
    Ok(CommandRecord::from_bytes(&bytes))
}

/// ioctl-style request code: read/write direction, record size, type and number.
const fn request_code(nr: u32) -> u32 {
    const READ_WRITE: u32 = 3;
    (READ_WRITE << 30) | ((CommandRecord::SIZE as u32) << 16) | ((b'm' as u32) << 8) | nr
}

/// Control commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Join or create container `cid`.
    Create,
    /// Leave the caller's container.
    Delete,
    /// Acquire lock `oid` in the caller's container.
    Lock,
    /// Release lock `oid` in the caller's container.
    Unlock,
    /// Release memory object `oid` in the caller's container.
    Free,
}

impl Command {
    /// Every command, in code order.
    pub const ALL: [Command; 5] = [
        Command::Create,
        Command::Delete,
        Command::Lock,
        Command::Unlock,
        Command::Free,
    ];

    /// The request code of this command.
    pub const fn code(self) -> u32 {
        match self {
            Command::Create => request_code(0),
            Command::Delete => request_code(1),
            Command::Lock => request_code(2),
            Command::Unlock => request_code(3),
            Command::Free => request_code(4),
        }
    }

    /// Decode a request code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCommand`] for codes that name no command.
    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.code() == code)
            .ok_or(Error::UnknownCommand(code))
    }

    /// Short name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Delete => "delete",
            Command::Lock => "lock",
            Command::Unlock => "unlock",
            Command::Free => "free",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Routes caller requests to the registry on behalf of the calling task.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use memory_container::dispatch::{Command, CommandRecord, Dispatcher};
/// use memory_container::identity::FixedIdentity;
/// use memory_container::ids::TaskId;
/// use memory_container::registry::Registry;
///
/// let registry = Arc::new(Registry::default());
/// let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::new(FixedIdentity(TaskId(1))));
///
/// dispatcher.ioctl(Command::Create.code(), &CommandRecord::new(7, 0)).unwrap();
/// let mapping = dispatcher.mmap(3, 4096).unwrap();
/// assert_eq!(mapping.len(), 4096);
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    identity: Arc<dyn TaskIdentity>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, identifying callers with `identity`.
    pub fn new(registry: Arc<Registry>, identity: Arc<dyn TaskIdentity>) -> Self {
        Self { registry, identity }
    }

    /// The registry behind this dispatcher.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The task issuing the current call.
    pub fn current_task(&self) -> TaskId {
        self.identity.current_task()
    }

    /// Dispatch a control command by request code.
    ///
    /// Unknown codes fail with [`Error::UnknownCommand`] before caller memory
    /// is touched.
    pub fn ioctl<M: CallerMemory + ?Sized>(&self, code: u32, arg: &M) -> Result<()> {
        let command = Command::from_code(code)?;
        self.dispatch(command, arg)
    }

    /// Dispatch a control command and return `0` or a negated errno.
    pub fn ioctl_raw<M: CallerMemory + ?Sized>(&self, code: u32, arg: &M) -> i32 {
        match self.ioctl(code, arg) {
            Ok(()) => 0,
            Err(e) => -e.errno().raw_os_error(),
        }
    }

    /// Run `command` with the record copied from `arg`.
    ///
    /// A transfer failure aborts the command before the registry is touched.
    pub fn dispatch<M: CallerMemory + ?Sized>(&self, command: Command, arg: &M) -> Result<()> {
        let task = self.current_task();
        let _guard = span_operation(command.name(), task).entered();

        let result = read_command(arg).and_then(|record| self.execute(command, task, record));
        if let Err(e) = &result {
            trace_failure(command.name(), task, e);
        }
        result
    }

    fn execute(&self, command: Command, task: TaskId, record: CommandRecord) -> Result<()> {
        let oid = ObjectId(record.oid);
        match command {
            Command::Create => {
                self.registry.join_or_create(ContainerId(record.cid), task)?;
                self.log_containers();
                Ok(())
            }
            Command::Delete => {
                if self.registry.leave(task).is_none() {
                    tracing::debug!(
                        task = %task,
                        container = record.cid,
                        "delete by non-member ignored"
                    );
                }
                self.log_containers();
                Ok(())
            }
            Command::Lock => self.registry.lock(task, oid),
            Command::Unlock => self.registry.unlock(task, oid),
            Command::Free => self.registry.free(task, oid),
        }
    }

    fn log_containers(&self) {
        if tracing::enabled!(tracing::Level::TRACE) {
            trace_snapshot(&self.registry.snapshot());
        }
    }

    /// Join or create the container named in the record.
    pub fn create<M: CallerMemory + ?Sized>(&self, arg: &M) -> Result<()> {
        self.dispatch(Command::Create, arg)
    }

    /// Leave the caller's container.
    pub fn delete<M: CallerMemory + ?Sized>(&self, arg: &M) -> Result<()> {
        self.dispatch(Command::Delete, arg)
    }

    /// Acquire the lock named in the record. May block.
    pub fn lock<M: CallerMemory + ?Sized>(&self, arg: &M) -> Result<()> {
        self.dispatch(Command::Lock, arg)
    }

    /// Release the lock named in the record.
    pub fn unlock<M: CallerMemory + ?Sized>(&self, arg: &M) -> Result<()> {
        self.dispatch(Command::Unlock, arg)
    }

    /// Release the memory object named in the record.
    pub fn free<M: CallerMemory + ?Sized>(&self, arg: &M) -> Result<()> {
        self.dispatch(Command::Free, arg)
    }

    /// Map object `oid` of the caller's container, allocating it on first use.
    pub fn mmap(&self, oid: u64, len: usize) -> Result<Mapping> {
        let task = self.current_task();
        let _guard = span_operation("mmap", task).entered();

        let result = self.registry.map(task, ObjectId(oid), len);
        if let Err(e) = &result {
            trace_failure("mmap", task, e);
        }
        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
