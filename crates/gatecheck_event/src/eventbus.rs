use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

type Listener = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub struct EventBus {
    listeners: Mutex<HashMap<TypeId, Vec<Listener>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a listener for a specific event type.
    ///
    /// # Example
    /// ```rust
    /// use gatecheck_event::{BUS, ClientAdmitted};
    ///
    /// BUS.on::<ClientAdmitted, _>(|event| {
    ///     println!("{} was admitted", event.identity);
    /// });
    /// ```
    pub fn on<E, F>(&self, listener: F)
    where
        E: Any + Send + Sync + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut map = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(TypeId::of::<E>()).or_default();

        let wrapper: Listener = Arc::new(move |ev| {
            if let Some(e) = ev.downcast_ref::<E>() {
                listener(e);
            }
        });

        entry.push(wrapper);
    }

    /// Emits an event. All listeners registered for this event type will be called.
    ///
    /// Listeners run outside the registry lock, so a listener may emit or register.
    pub fn emit<E>(&self, event: &E)
    where
        E: Any + Send + Sync + 'static,
    {
        let listeners = {
            let map = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&TypeId::of::<E>()) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };

        for listener in listeners {
            listener(event);
        }
    }
}

pub static BUS: LazyLock<EventBus> = LazyLock::new(EventBus::new);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Ping(usize);
    struct Pong;

    #[test]
    fn test_listener_receives_only_its_type() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        bus.on::<Ping, _>(move |ping| {
            counter.fetch_add(ping.0, Ordering::SeqCst);
        });

        bus.emit(&Ping(3));
        bus.emit(&Pong);
        bus.emit(&Ping(4));

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_listener_may_emit_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let pongs = Arc::new(AtomicUsize::new(0));

        let inner = bus.clone();
        bus.on::<Ping, _>(move |_| inner.emit(&Pong));

        let counter = pongs.clone();
        bus.on::<Pong, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Ping(1));
        assert_eq!(pongs.load(Ordering::SeqCst), 1);
    }
}
