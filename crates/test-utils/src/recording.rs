#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use taskq::{CallbackKind, TaskBuilder, TaskGroupBuilder, TaskSnapshot, TaskState};

/// One delivered callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub label: String,
    pub kind: CallbackKind,
    pub state: TaskState,
    pub thread: Option<String>,
}

/// Records every callback delivered to the units it is attached to.
#[derive(Clone, Default)]
pub struct RecordingCallbacks {
    log: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorder(&self, kind: CallbackKind) -> impl Fn(&TaskSnapshot) + Send + Sync + 'static {
        let log = Arc::clone(&self.log);
        move |snapshot: &TaskSnapshot| {
            log.lock().unwrap().push(Delivery {
                label: snapshot.label.clone(),
                kind,
                state: snapshot.state,
                thread: std::thread::current().name().map(str::to_string),
            });
        }
    }

    /// Install all four callbacks on a task builder.
    pub fn attach(&self, builder: TaskBuilder) -> TaskBuilder {
        builder
            .on(CallbackKind::Start, self.recorder(CallbackKind::Start))
            .on(CallbackKind::Completed, self.recorder(CallbackKind::Completed))
            .on(CallbackKind::Failed, self.recorder(CallbackKind::Failed))
            .on(CallbackKind::Finished, self.recorder(CallbackKind::Finished))
    }

    /// Install all four callbacks on a group builder.
    pub fn attach_group(&self, builder: TaskGroupBuilder) -> TaskGroupBuilder {
        builder
            .on(CallbackKind::Start, self.recorder(CallbackKind::Start))
            .on(CallbackKind::Completed, self.recorder(CallbackKind::Completed))
            .on(CallbackKind::Failed, self.recorder(CallbackKind::Failed))
            .on(CallbackKind::Finished, self.recorder(CallbackKind::Finished))
    }

    pub fn all(&self) -> Vec<Delivery> {
        self.log.lock().unwrap().clone()
    }

    /// Callback kinds delivered to `label`, in delivery order.
    pub fn kinds_for(&self, label: &str) -> Vec<CallbackKind> {
        self.all()
            .into_iter()
            .filter(|d| d.label == label)
            .map(|d| d.kind)
            .collect()
    }

    /// Labels in the order their `kind` callback was delivered.
    pub fn labels_for(&self, kind: CallbackKind) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.label)
            .collect()
    }
}
