//! Dialogues registry: creates, resolves and updates dialogues for one agent
//! and one protocol.
//!
//! Lock order is registry map first, then the individual dialogue. Nothing
//! takes them in the opposite order, and neither lock is held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::dialogue::label::DialogueLabel;
use crate::dialogue::rules::DialogueRules;
use crate::dialogue::state::{Dialogue, DialogueState};
use crate::dialogue::stats::DialogueStats;
use crate::error::{ParleyError, Result};
use crate::protocol::envelope::Address;
use crate::protocol::message::{DialogueReference, Message, Protocol};

/// Role inference hook: `(first_message, self_address) -> role`.
pub type RoleFn<P> = Arc<dyn Fn(&Message<P>, &str) -> <P as Protocol>::Role + Send + Sync>;

/// Callback run once when a dialogue reaches a terminal performative.
/// It runs after every lock is released, so it may read the handle or call
/// back into the registry.
pub type TerminalHook<P> = Arc<dyn Fn(&DialogueHandle<P>) + Send + Sync>;

struct TerminalHooks<P: Protocol>(RwLock<Vec<TerminalHook<P>>>);

impl<P: Protocol> TerminalHooks<P> {
    fn new() -> Self {
        Self(RwLock::new(Vec::new()))
    }

    fn add(&self, hook: TerminalHook<P>) {
        match self.0.write() {
            Ok(mut g) => g.push(hook),
            Err(poisoned) => poisoned.into_inner().push(hook),
        }
    }

    fn fire(&self, handle: &DialogueHandle<P>) {
        let hooks = match self.0.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for hook in hooks {
            hook(handle);
        }
    }
}

/// Shared handle to one dialogue. Clones refer to the same instance.
pub struct DialogueHandle<P: Protocol> {
    inner: Arc<Mutex<Dialogue<P>>>,
    hooks: Arc<TerminalHooks<P>>,
}

impl<P: Protocol> Clone for DialogueHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<P: Protocol> DialogueHandle<P> {
    fn new(dialogue: Dialogue<P>, hooks: Arc<TerminalHooks<P>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dialogue)),
            hooks,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Dialogue<P>>> {
        self.inner
            .lock()
            .map_err(|_| ParleyError::Internal("dialogue lock poisoned".into()))
    }

    /// True if both handles point at the same dialogue.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the dialogue under its lock.
    pub fn read<T>(&self, f: impl FnOnce(&Dialogue<P>) -> T) -> Result<T> {
        Ok(f(&*self.lock()?))
    }

    pub fn reply(&self, target: &Message<P>, body: P::Body) -> Result<Message<P>> {
        self.with_append(|d| d.reply(target, body))
    }

    pub fn reply_to_last(&self, body: P::Body) -> Result<Message<P>> {
        self.with_append(|d| d.reply_to_last(body))
    }

    /// Run a successful append under the lock, then fire terminal hooks
    /// with the lock released. An ended dialogue accepts nothing, so a
    /// successful append that leaves it ended is the one that ended it.
    fn with_append<T>(&self, f: impl FnOnce(&mut Dialogue<P>) -> Result<T>) -> Result<T> {
        let (out, ended) = {
            let mut d = self.lock()?;
            let out = f(&mut d)?;
            (out, d.is_ended())
        };
        if ended {
            self.hooks.fire(self);
        }
        Ok(out)
    }

    pub fn label(&self) -> Result<DialogueLabel> {
        self.read(|d| d.label().clone())
    }

    pub fn state(&self) -> Result<DialogueState> {
        self.read(|d| d.state())
    }

    pub fn role(&self) -> Result<P::Role> {
        self.read(|d| d.role())
    }

    pub fn end_state(&self) -> Result<Option<P::EndState>> {
        self.read(|d| d.end_state())
    }

    pub fn last_message(&self) -> Result<Option<Message<P>>> {
        self.read(|d| d.last_message().cloned())
    }

    pub fn messages(&self) -> Result<Vec<Message<P>>> {
        self.read(|d| d.messages().to_vec())
    }
}

impl<P: Protocol> std::fmt::Debug for DialogueHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_lock() {
            Ok(d) => std::fmt::Debug::fmt(&*d, f),
            Err(_) => f.write_str("DialogueHandle(<locked>)"),
        }
    }
}

/// Bytes of entropy in one reference half.
const NONCE_BYTES: usize = 32;

/// Fresh reference half: random hex, so references issued by different
/// agents do not collide.
fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; NONCE_BYTES]>())
}

/// Where an incoming or outgoing message belongs.
enum Resolved<P: Protocol> {
    Existing(DialogueHandle<P>),
    /// Self-initiated dialogue still keyed by its incomplete label; the
    /// message completes the reference.
    Completing {
        handle: DialogueHandle<P>,
        incomplete: DialogueLabel,
        complete: DialogueLabel,
    },
}

impl<P: Protocol> Resolved<P> {
    fn handle(&self) -> &DialogueHandle<P> {
        match self {
            Resolved::Existing(handle) => handle,
            Resolved::Completing { handle, .. } => handle,
        }
    }

    fn fits(&self, message: &Message<P>) -> Result<bool> {
        Ok(self.handle().lock()?.is_valid_next(message))
    }
}

struct RegistryState<P: Protocol> {
    dialogues: HashMap<DialogueLabel, DialogueHandle<P>>,
    /// Incomplete label -> complete label, recorded when a reference is
    /// completed.
    aliases: HashMap<DialogueLabel, DialogueLabel>,
}

impl<P: Protocol> RegistryState<P> {
    fn resolve(&self, label: &DialogueLabel) -> Option<&DialogueHandle<P>> {
        self.dialogues.get(label).or_else(|| {
            self.aliases
                .get(label)
                .and_then(|complete| self.dialogues.get(complete))
        })
    }

    fn is_taken(&self, label: &DialogueLabel) -> bool {
        self.dialogues.contains_key(label) || self.aliases.contains_key(label)
    }

}

/// Per-agent, per-protocol dialogue registry.
pub struct Dialogues<P: Protocol> {
    self_address: Address,
    rules: Arc<DialogueRules<P>>,
    role_fn: RoleFn<P>,
    stats: Arc<DialogueStats<P::EndState>>,
    hooks: Arc<TerminalHooks<P>>,
    state: Mutex<RegistryState<P>>,
}

impl<P: Protocol> Dialogues<P> {
    /// Registry using the protocol's own rules and role inference.
    pub fn new(self_address: impl Into<Address>) -> Self {
        Self::with_role_fn(self_address, Arc::new(P::role_from_first_message))
    }

    pub fn with_role_fn(self_address: impl Into<Address>, role_fn: RoleFn<P>) -> Self {
        Self {
            self_address: self_address.into(),
            rules: Arc::new(P::rules()),
            role_fn,
            stats: Arc::new(DialogueStats::new()),
            hooks: Arc::new(TerminalHooks::new()),
            state: Mutex::new(RegistryState {
                dialogues: HashMap::new(),
                aliases: HashMap::new(),
            }),
        }
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    pub fn rules(&self) -> &DialogueRules<P> {
        &self.rules
    }

    pub fn stats(&self) -> &DialogueStats<P::EndState> {
        &self.stats
    }

    /// Register a callback for dialogues of this registry that end, whether
    /// the terminal message arrives through `update` or is sent through a
    /// handle's `reply`.
    pub fn on_terminal(&self, hook: impl Fn(&DialogueHandle<P>) + Send + Sync + 'static) {
        self.hooks.add(Arc::new(hook));
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState<P>>> {
        self.state
            .lock()
            .map_err(|_| ParleyError::Internal("dialogues registry lock poisoned".into()))
    }

    /// Open a new self-initiated dialogue with `counterparty`.
    pub fn create(
        &self,
        counterparty: impl Into<Address>,
        body: P::Body,
    ) -> Result<(Message<P>, DialogueHandle<P>)> {
        let counterparty = counterparty.into();
        let performative = P::performative(&body);
        if !self.rules.is_initial(performative) {
            return Err(ParleyError::ProtocolViolation(format!(
                "{performative} cannot open a dialogue"
            )));
        }
        if counterparty.is_empty() || counterparty == self.self_address {
            return Err(ParleyError::InvalidMessage(format!(
                "invalid counterparty {counterparty:?}"
            )));
        }

        let mut st = self.lock()?;
        let reference = loop {
            let candidate = DialogueReference::incomplete(generate_nonce());
            let label = DialogueLabel::new(candidate.clone(), counterparty.clone(), self.self_address.clone());
            if !st.is_taken(&label) {
                break candidate;
            }
        };
        let message = Message::new(reference, 1, 0, self.self_address.clone(), counterparty, body);
        let handle = self.register_self_initiated(&mut st, &message)?;
        Ok((message, handle))
    }

    /// Register an externally built opening message sent by this agent.
    pub fn create_with_message(&self, message: &Message<P>) -> Result<DialogueHandle<P>> {
        message.validate()?;
        if message.sender != self.self_address {
            return Err(ParleyError::InvalidMessage(format!(
                "opening message sender {} is not this agent",
                message.sender
            )));
        }
        let mut st = self.lock()?;
        self.register_self_initiated(&mut st, message)
    }

    fn register_self_initiated(
        &self,
        st: &mut RegistryState<P>,
        message: &Message<P>,
    ) -> Result<DialogueHandle<P>> {
        if message.dialogue_reference.is_complete() {
            return Err(ParleyError::InvalidMessage(
                "self-initiated dialogue must start with an incomplete reference".into(),
            ));
        }
        let label = DialogueLabel::new(
            message.dialogue_reference.clone(),
            message.to.clone(),
            self.self_address.clone(),
        );
        if st.is_taken(&label) {
            return Err(ParleyError::ProtocolViolation(format!(
                "dialogue {label} already exists"
            )));
        }
        let role = (self.role_fn)(message, &self.self_address);
        let mut dialogue = Dialogue::new(
            label.clone(),
            self.self_address.clone(),
            role,
            Arc::clone(&self.rules),
            Arc::clone(&self.stats),
        );
        dialogue.append(message.clone())?;
        let handle = DialogueHandle::new(dialogue, Arc::clone(&self.hooks));
        st.dialogues.insert(label, handle.clone());
        tracing::debug!(agent = %self.self_address, counterparty = %message.to, "dialogue created");
        Ok(handle)
    }

    /// Absorb a message (self-sent or received) into its dialogue, opening
    /// an opponent-initiated dialogue for a legal opener.
    pub fn update(&self, message: &Message<P>) -> Result<DialogueHandle<P>> {
        message.validate()?;
        let is_outgoing = message.sender == self.self_address;
        if !is_outgoing && message.to != self.self_address {
            return Err(ParleyError::InvalidMessage(format!(
                "message to {} is not addressed to {}",
                message.to, self.self_address
            )));
        }
        let opponent = if is_outgoing { &message.to } else { &message.sender };

        let handle = {
            let mut st = self.lock()?;
            match self.resolve_message(&st, message, opponent)? {
                Some(Resolved::Existing(handle)) => {
                    handle.lock()?.append(message.clone())?;
                    handle
                }
                // First reply completing a reference this agent issued.
                Some(Resolved::Completing {
                    handle,
                    incomplete,
                    complete,
                }) => {
                    {
                        let mut d = handle.lock()?;
                        d.check_next(message)?;
                        d.set_label(complete.clone());
                        d.append(message.clone())?;
                    }
                    st.dialogues.remove(&incomplete);
                    st.dialogues.insert(complete.clone(), handle.clone());
                    st.aliases.insert(incomplete, complete);
                    handle
                }
                None => self.open(&mut st, message, opponent, is_outgoing)?,
            }
        };

        if handle.lock()?.is_ended() {
            self.hooks.fire(&handle);
        }
        Ok(handle)
    }

    /// New dialogue for a legal opener nobody has registered yet.
    fn open(
        &self,
        st: &mut RegistryState<P>,
        message: &Message<P>,
        opponent: &str,
        is_outgoing: bool,
    ) -> Result<DialogueHandle<P>> {
        let reference = &message.dialogue_reference;
        if !(message.is_opener() && self.rules.is_initial(message.performative())) {
            return Err(ParleyError::NoDialogue(format!(
                "no dialogue for reference {reference} with {opponent}"
            )));
        }

        if is_outgoing {
            return self.register_self_initiated(st, message);
        }

        // Opponent-initiated: fill in our half of the reference.
        let mut complete = reference.clone();
        if complete.responder.is_empty() {
            complete.responder = generate_nonce();
        }
        let incomplete_label = DialogueLabel::new(reference.to_incomplete(), opponent, opponent);
        let label = DialogueLabel::new(complete, opponent, opponent);
        if st.is_taken(&label) || st.is_taken(&incomplete_label) {
            return Err(ParleyError::ProtocolViolation(format!(
                "dialogue {label} already exists"
            )));
        }
        let role = (self.role_fn)(message, &self.self_address);
        let mut dialogue = Dialogue::new(
            label.clone(),
            self.self_address.clone(),
            role,
            Arc::clone(&self.rules),
            Arc::clone(&self.stats),
        );
        dialogue.append(message.clone())?;
        let handle = DialogueHandle::new(dialogue, Arc::clone(&self.hooks));
        st.dialogues.insert(label.clone(), handle.clone());
        st.aliases.insert(incomplete_label, label);
        tracing::debug!(agent = %self.self_address, counterparty = %opponent, "dialogue opened by counterparty");
        Ok(handle)
    }

    /// Find the dialogue `message` belongs to.
    ///
    /// A reference can name one dialogue each party started with the other.
    /// When both exist, the message goes to the one that accepts it as its
    /// next message; if both or neither do, it is rejected.
    fn resolve_message(
        &self,
        st: &RegistryState<P>,
        message: &Message<P>,
        opponent: &str,
    ) -> Result<Option<Resolved<P>>> {
        let reference = &message.dialogue_reference;
        if message.is_opener() {
            // The sender of message 1 is the starter by definition.
            let label = DialogueLabel::new(reference.clone(), opponent, message.sender.clone());
            return Ok(st.resolve(&label).cloned().map(Resolved::Existing));
        }

        let self_label = DialogueLabel::new(reference.clone(), opponent, self.self_address.clone());
        let own = match st.resolve(&self_label) {
            Some(handle) => Some(Resolved::Existing(handle.clone())),
            None if reference.is_complete() => {
                let incomplete = self_label.incomplete();
                st.dialogues.get(&incomplete).map(|handle| Resolved::Completing {
                    handle: handle.clone(),
                    incomplete,
                    complete: self_label,
                })
            }
            None => None,
        };
        let other_label = DialogueLabel::new(reference.clone(), opponent, opponent);
        let theirs = st.resolve(&other_label).cloned().map(Resolved::Existing);

        match (own, theirs) {
            (Some(own), Some(theirs)) if !own.handle().ptr_eq(theirs.handle()) => {
                match (own.fits(message)?, theirs.fits(message)?) {
                    (true, false) => Ok(Some(own)),
                    (false, true) => Ok(Some(theirs)),
                    (both, _) => Err(ParleyError::ProtocolViolation(format!(
                        "message {} with {opponent} fits {} of the dialogues sharing reference {reference}",
                        message.message_id,
                        if both { "both" } else { "neither" }
                    ))),
                }
            }
            (Some(own), _) => Ok(Some(own)),
            (None, theirs) => Ok(theirs),
        }
    }

    /// Pure lookup of the dialogue `message` belongs to.
    pub fn get_dialogue(&self, message: &Message<P>) -> Result<Option<DialogueHandle<P>>> {
        let opponent = if message.sender == self.self_address {
            &message.to
        } else {
            &message.sender
        };
        let st = self.lock()?;
        if let Some(found) = self.resolve_message(&st, message, opponent)? {
            return Ok(Some(found.handle().clone()));
        }
        let incomplete = DialogueLabel::new(
            message.dialogue_reference.to_incomplete(),
            opponent.clone(),
            self.self_address.clone(),
        );
        Ok(st.dialogues.get(&incomplete).cloned())
    }

    pub fn get_dialogue_by_label(&self, label: &DialogueLabel) -> Result<Option<DialogueHandle<P>>> {
        Ok(self.lock()?.resolve(label).cloned())
    }

    pub fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Result<Vec<DialogueHandle<P>>> {
        let st = self.lock()?;
        let mut out = Vec::new();
        for (label, handle) in &st.dialogues {
            if label.opponent == counterparty {
                out.push(handle.clone());
            }
        }
        Ok(out)
    }

    /// Dialogues that have not ended.
    pub fn active_dialogues(&self) -> Result<Vec<DialogueHandle<P>>> {
        self.filter(|d| !d.is_ended())
    }

    pub fn terminal_dialogues(&self) -> Result<Vec<DialogueHandle<P>>> {
        self.filter(|d| d.is_ended())
    }

    fn filter(&self, keep: impl Fn(&Dialogue<P>) -> bool) -> Result<Vec<DialogueHandle<P>>> {
        let st = self.lock()?;
        let mut out = Vec::new();
        for handle in st.dialogues.values() {
            if keep(&*handle.lock()?) {
                out.push(handle.clone());
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.dialogues.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Evict a dialogue and every alias pointing at it.
    pub fn remove(&self, label: &DialogueLabel) -> Result<Option<DialogueHandle<P>>> {
        let mut st = self.lock()?;
        let key = if st.dialogues.contains_key(label) {
            label.clone()
        } else {
            match st.aliases.get(label) {
                Some(complete) => complete.clone(),
                None => return Ok(None),
            }
        };
        let removed = st.dialogues.remove(&key);
        st.aliases.retain(|_, complete| *complete != key);
        Ok(removed)
    }
}
