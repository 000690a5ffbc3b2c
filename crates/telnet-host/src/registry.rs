// Copyright (C) 2025 The telwire developers. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::connection::Connection;

/// Live connections keyed by client id. The lock is never held across an await.
#[derive(Default)]
pub(crate) struct Registry {
    connections: Mutex<HashMap<Uuid, Arc<Connection>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, connection: Arc<Connection>) {
        self.lock().insert(connection.id(), connection);
    }

    /// Removing an id that isn't present is a no-op.
    pub(crate) fn remove(&self, client_id: &Uuid) -> Option<Arc<Connection>> {
        self.lock().remove(client_id)
    }

    pub(crate) fn get(&self, client_id: &Uuid) -> Option<Arc<Connection>> {
        self.lock().get(client_id).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
