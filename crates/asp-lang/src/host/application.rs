use std::{
    rc::Rc,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock},
    time::Instant,
};

use super::{
    RequestId,
    shared::{Contents, SharedValue},
};
use crate::{
    eval::{error::EvalError, flow::RequestControl},
    object::{Object, arg, not_found},
    value::Value,
};

#[derive(Debug, Default)]
struct LockState {
    holder: Option<RequestId>,
    /// Nested `Lock` calls by the holder.
    depth: u32,
}

/// The process-wide `Application` contents.
///
/// Reads never block. Writes wait while another request holds the
/// script-visible lock, for at most the writer's remaining script time.
#[derive(Debug, Default)]
pub struct ApplicationStore {
    contents: RwLock<Contents>,
    lock: Mutex<LockState>,
    released: Condvar,
}

impl ApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<SharedValue> {
        self.read().get(key).cloned()
    }

    pub fn item(&self, key: &Value) -> Value {
        self.read().item(key)
    }

    /// A snapshot of the current contents.
    pub fn contents(&self) -> Contents {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn set(
        &self,
        request: RequestId,
        key: &str,
        value: SharedValue,
        deadline: Option<Instant>,
    ) -> Result<(), EvalError> {
        let _turn = self.wait_turn(request, deadline)?;
        self.write().insert(key, value);
        Ok(())
    }

    pub fn remove(
        &self,
        request: RequestId,
        key: &str,
        deadline: Option<Instant>,
    ) -> Result<(), EvalError> {
        let _turn = self.wait_turn(request, deadline)?;
        self.write().remove(key);
        Ok(())
    }

    pub fn clear(&self, request: RequestId, deadline: Option<Instant>) -> Result<(), EvalError> {
        let _turn = self.wait_turn(request, deadline)?;
        self.write().clear();
        Ok(())
    }

    /// `Application.Lock`, re-entrant for the holding request.
    pub fn lock(&self, request: RequestId, deadline: Option<Instant>) -> Result<(), EvalError> {
        let mut state = self.wait_turn(request, deadline)?;
        state.holder = Some(request);
        state.depth += 1;
        tracing::trace!(request, depth = state.depth, "application locked");
        Ok(())
    }

    /// `Application.Unlock`. A no-op for any request but the holder.
    pub fn unlock(&self, request: RequestId) {
        let mut state = self.lock_state();
        if state.holder != Some(request) {
            return;
        }
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.holder = None;
            self.released.notify_all();
        }
    }

    /// Drops whatever lock `request` still holds when it ends.
    pub fn release(&self, request: RequestId) {
        let mut state = self.lock_state();
        if state.holder == Some(request) {
            tracing::debug!(request, "releasing application lock held at request end");
            state.holder = None;
            state.depth = 0;
            self.released.notify_all();
        }
    }

    pub fn holder(&self) -> Option<RequestId> {
        self.lock_state().holder
    }

    fn wait_turn(
        &self,
        request: RequestId,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'_, LockState>, EvalError> {
        let mut state = self.lock_state();
        while state.holder.is_some_and(|holder| holder != request) {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EvalError::Timeout);
                    }
                    self.released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        Ok(state)
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Contents> {
        self.contents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Contents> {
        self.contents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The script-visible `Application` object of one request.
#[derive(Debug, Clone)]
pub struct ApplicationObject {
    store: Arc<ApplicationStore>,
    request: RequestId,
    control: Rc<RequestControl>,
}

impl ApplicationObject {
    pub fn new(store: Arc<ApplicationStore>, request: RequestId, control: Rc<RequestControl>) -> Self {
        Self {
            store,
            request,
            control,
        }
    }

    fn store_item(&self, key: &Value, value: &Value) -> Result<(), EvalError> {
        let value = SharedValue::try_from(value)?;
        self.store
            .set(self.request, &key.to_string(), value, self.control.deadline())
    }
}

impl Object for ApplicationObject {
    fn type_name(&self) -> &str {
        "IApplicationObject"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "contents" => Ok(Value::Object(Rc::new(self.clone()))),
            "count" => Ok(Value::from(self.store.len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(not_found(self, name))
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "lock" => {
                self.store.lock(self.request, self.control.deadline())?;
                Ok(Value::Empty)
            }
            "unlock" => {
                self.store.unlock(self.request);
                Ok(Value::Empty)
            }
            "contents" if args.is_empty() => self.get_property(name),
            "contents" | "item" | "" => Ok(self.store.item(arg(args, 0))),
            "remove" => {
                self.store.remove(
                    self.request,
                    &arg(args, 0).to_string(),
                    self.control.deadline(),
                )?;
                Ok(Value::Empty)
            }
            "removeall" => {
                self.store.clear(self.request, self.control.deadline())?;
                Ok(Value::Empty)
            }
            "count" => Ok(Value::from(self.store.len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn enumerate(&self) -> Option<Vec<Value>> {
        Some(self.store.contents().keys())
    }

    fn set_item(&self, args: &[Value], value: Value) -> Result<(), EvalError> {
        self.store_item(arg(args, 0), &value)
    }
}
