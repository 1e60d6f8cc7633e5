#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code)]
    #![allow(unused_imports)]

    pub(crate) use loom::{cell, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code)]

    pub(crate) mod sync {
        pub(crate) use std::sync::*;
    }

    pub(crate) mod thread {
        pub(crate) use std::thread::{current, ThreadId};
        #[cfg(test)]
        pub(crate) use std::thread::JoinHandle;

        #[cfg(test)]
        pub(crate) fn spawn<F, T>(f: F) -> JoinHandle<T>
        where
            F: FnOnce() -> T + Send + 'static,
            T: Send + 'static,
        {
            let dispatch = tracing::dispatcher::Dispatch::default();
            std::thread::spawn(move || {
                let _guard = tracing::dispatcher::set_default(&dispatch);
                test_debug!("thread spawned");
                f()
            })
        }
    }


    #[cfg(test)]
    pub(crate) fn model(f: impl Fn()) {
        let _trace = crate::test_util::trace_init();
        f()
    }
}
