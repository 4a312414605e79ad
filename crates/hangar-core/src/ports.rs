use std::{collections::HashSet, sync::Arc};

use hangar_instance::{HTTP_PORT_OFFSET, WS_PORT_OFFSET};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{error::StoreError, store::InstanceStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error(
        "port range exhausted: requested {requested}, found {available} in {base}..{base}+{window}"
    )]
    Exhausted {
        requested: usize,
        available: usize,
        base: u16,
        window: u16,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Picks `n` service ports from `[base, base + window)` so that each port and its
/// derived http/ws ports collide with nothing in `used` or with each other.
///
/// Deterministic for a given `used` set. Nothing is returned unless all `n` fit.
pub fn allocate_from(
    used: &HashSet<u16>,
    base: u16,
    window: u16,
    n: usize,
) -> Result<Vec<u16>, PortError> {
    let mut taken = used.clone();
    let mut out = Vec::with_capacity(n);
    let end = u32::from(base) + u32::from(window);

    for candidate in u32::from(base)..end {
        if out.len() == n {
            break;
        }
        let http = candidate + u32::from(HTTP_PORT_OFFSET);
        let ws = candidate + u32::from(WS_PORT_OFFSET);
        if ws > u32::from(u16::MAX) {
            break;
        }
        let triple = [candidate as u16, http as u16, ws as u16];
        if triple.iter().any(|p| taken.contains(p)) {
            continue;
        }
        taken.extend(triple);
        out.push(triple[0]);
    }

    if out.len() < n {
        return Err(PortError::Exhausted {
            requested: n,
            available: out.len(),
            base,
            window,
        });
    }
    Ok(out)
}

/// Ports handed out by [`PortAllocator::reserve`].
///
/// Holds the allocator lock: no other batch can scan until this is dropped, so the
/// caller must persist the new instances first.
pub struct PortReservation {
    pub ports: Vec<u16>,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Clone)]
pub struct PortAllocator {
    base: u16,
    window: u16,
    lock: Arc<Mutex<()>>,
}

impl PortAllocator {
    pub fn new(base: u16, window: u16) -> Self {
        Self {
            base,
            window,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn reserve(
        &self,
        store: &dyn InstanceStore,
        n: usize,
    ) -> Result<PortReservation, PortError> {
        let guard = self.lock.clone().lock_owned().await;

        let used: HashSet<u16> = store
            .list()
            .await?
            .iter()
            .flat_map(|inst| inst.ports())
            .collect();

        match allocate_from(&used, self.base, self.window, n) {
            Ok(ports) => Ok(PortReservation {
                ports,
                _guard: guard,
            }),
            Err(e) => {
                tracing::warn!(requested = n, in_use = used.len(), error = %e, "port allocation failed");
                Err(e)
            }
        }
    }
}
