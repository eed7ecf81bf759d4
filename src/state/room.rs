use indexmap::IndexSet;
use rand::Rng;
use serde::Serialize;

use crate::{
    dao::models::{CurrentQuestionEntity, PlayerEntity, QuestionEntity, Table},
    state::{
        feed::FeedEvent,
        pointer::{AbortError, ApplyError, Plan, PlanError, PlanId, PointerTransitions, Rollback},
        reconciler::{Applied, Reconciler, Record},
    },
};

/// Participant as seen by a room handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    /// Short code derived from the user token and the room.
    pub id: String,
    /// Opaque token of the participant.
    pub user_token: String,
    /// Room the participant joined.
    pub room_id: String,
    /// Display name captured at join time.
    pub user_name: String,
    /// Likes received from peers.
    pub likes: u32,
}

/// Question with its local-only presentation flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    /// Identifier assigned by the store.
    pub id: i64,
    /// Room the question belongs to.
    pub room_id: String,
    /// Question text.
    pub content: String,
    /// Whether `next` may land on this question. Never persisted.
    pub show: bool,
}

/// The room's "on screen" pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentQuestion {
    /// Room the pointer belongs to; also its key.
    pub room_id: String,
    /// Text of the question on screen.
    pub content: String,
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            user_token: value.user_token,
            room_id: value.room_id,
            user_name: value.user_name,
            likes: value.likes,
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id,
            room_id: value.room_id,
            content: value.content,
            show: true,
        }
    }
}

impl From<CurrentQuestionEntity> for CurrentQuestion {
    fn from(value: CurrentQuestionEntity) -> Self {
        Self {
            room_id: value.room_id,
            content: value.content,
        }
    }
}

impl Record for Player {
    type Key = String;
    type Row = PlayerEntity;
    const TABLE: Table = Table::Players;

    fn key(&self) -> &String {
        &self.id
    }

    fn from_row(row: PlayerEntity) -> Self {
        row.into()
    }
}

impl Record for Question {
    type Key = i64;
    type Row = QuestionEntity;
    const TABLE: Table = Table::Questions;

    fn key(&self) -> &i64 {
        &self.id
    }

    fn from_row(row: QuestionEntity) -> Self {
        row.into()
    }

    fn absorb(&mut self, incoming: Self) {
        let show = self.show;
        *self = incoming;
        self.show = show;
    }
}

impl Record for CurrentQuestion {
    type Key = String;
    type Row = CurrentQuestionEntity;
    const TABLE: Table = Table::CurrentQuestion;

    fn key(&self) -> &String {
        &self.room_id
    }

    fn from_row(row: CurrentQuestionEntity) -> Self {
        row.into()
    }
}

/// Reconciled replica of one room plus the local-only state layered on top.
#[derive(Debug)]
pub struct RoomView {
    room_id: String,
    players: Reconciler<Player>,
    questions: Reconciler<Question>,
    current: Reconciler<CurrentQuestion>,
    selected: IndexSet<i64>,
    pointer: PointerTransitions,
    closed: bool,
}

impl RoomView {
    /// Empty, open view of `room_id`.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            players: Reconciler::new(),
            questions: Reconciler::new(),
            current: Reconciler::new(),
            selected: IndexSet::new(),
            pointer: PointerTransitions::new(),
            closed: false,
        }
    }

    /// Room this view replicates.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Replicated players.
    pub fn players(&self) -> &Reconciler<Player> {
        &self.players
    }

    /// Replicated questions in display order.
    pub fn questions(&self) -> &Reconciler<Question> {
        &self.questions
    }

    /// Questions currently selected, in selection order.
    pub fn selected(&self) -> &IndexSet<i64> {
        &self.selected
    }

    /// Optimistic move bookkeeping.
    pub fn pointer(&self) -> &PointerTransitions {
        &self.pointer
    }

    /// Whether the view stopped accepting changes.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the view closed. Returns `false` when it already was.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    /// Text of the question on screen, if any.
    pub fn current_content(&self) -> Option<&str> {
        self.current
            .get(&self.room_id)
            .map(|pointer| pointer.content.as_str())
    }

    /// Replace every collection with freshly fetched rows. Transient flags start over.
    pub fn seed(
        &mut self,
        players: Vec<PlayerEntity>,
        questions: Vec<QuestionEntity>,
        current: Option<CurrentQuestionEntity>,
    ) {
        self.players.seed(players.into_iter().map(Player::from));
        self.current.seed(current.into_iter().map(CurrentQuestion::from));
        self.reseed_questions(questions);
    }

    /// Replace the question list, dropping visibility and selection.
    pub fn reseed_questions(&mut self, questions: Vec<QuestionEntity>) {
        self.questions
            .seed(questions.into_iter().map(Question::from));
        self.selected.clear();
    }

    /// Fold a player notification.
    pub fn apply_player(&mut self, event: FeedEvent<Player>) -> Applied<String> {
        self.players.apply(event)
    }

    /// Fold a question notification. Deleted questions leave the selection.
    pub fn apply_question(&mut self, event: FeedEvent<Question>) -> Applied<i64> {
        let applied = self.questions.apply(event);
        if let Applied::Deleted(id) = &applied {
            self.selected.shift_remove(id);
        }
        applied
    }

    /// Apply a pointer notification. `Some(content)` when the displayed pointer changed.
    pub fn apply_current(&mut self, event: FeedEvent<CurrentQuestion>) -> Option<Option<String>> {
        let before = self.current_content().map(str::to_owned);
        let applied = match event {
            // The row only exists locally because of the pending optimistic write.
            FeedEvent::Insert(pointer) if self.pointer_is_optimistic_only() => {
                self.current.upsert(pointer)
            }
            event => self.current.apply(event),
        };
        if !applied.is_change() {
            return None;
        }
        self.pointer.observe_remote();
        let after = self.current_content().map(str::to_owned);
        (before != after).then_some(after)
    }

    /// Write the pointer optimistically and remember how to undo it.
    pub fn plan_pointer(&mut self, target: String) -> Result<Plan, PlanError> {
        let previous = self.current_content().map(str::to_owned);
        let plan = self.pointer.plan(previous, target.clone())?;
        self.set_pointer_local(Some(target));
        Ok(plan)
    }

    /// The store acknowledged the pending move.
    pub fn confirm_pointer(&mut self, plan_id: PlanId) -> Result<(), ApplyError> {
        self.pointer.apply(plan_id)
    }

    /// Undo an optimistic move unless the feed replaced it meanwhile.
    pub fn abort_pointer(&mut self, plan_id: PlanId) -> Result<Rollback, AbortError> {
        let rollback = self.pointer.abort(plan_id)?;
        if let Rollback::Restore(previous) = &rollback {
            self.set_pointer_local(previous.clone());
        }
        Ok(rollback)
    }

    fn pointer_is_optimistic_only(&self) -> bool {
        self.pointer
            .pending()
            .is_some_and(|plan| plan.previous.is_none())
    }

    fn set_pointer_local(&mut self, content: Option<String>) {
        match content {
            Some(content) => {
                self.current.upsert(CurrentQuestion {
                    room_id: self.room_id.clone(),
                    content,
                });
            }
            None => self.current.clear(),
        }
    }

    /// Question by id.
    pub fn question(&self, question_id: i64) -> Option<&Question> {
        self.questions.get(&question_id)
    }

    /// Local insert of an acknowledged question, shown and unselected.
    pub fn record_question(&mut self, entity: QuestionEntity) -> Applied<i64> {
        self.questions.apply(FeedEvent::Insert(Question::from(entity)))
    }

    /// Local delete of a question and its selection.
    pub fn remove_question(&mut self, question_id: i64) -> Applied<i64> {
        self.apply_question(FeedEvent::Delete(question_id))
    }

    /// Flip `show`. `None` for unknown ids.
    pub fn toggle_visibility(&mut self, question_id: i64) -> Option<bool> {
        let question = self.questions.get_mut(&question_id)?;
        question.show = !question.show;
        Some(question.show)
    }

    /// Flip selection. `None` for unknown ids.
    pub fn toggle_selection(&mut self, question_id: i64) -> Option<bool> {
        self.questions.get(&question_id)?;
        if self.selected.shift_remove(&question_id) {
            Some(false)
        } else {
            self.selected.insert(question_id);
            Some(true)
        }
    }

    /// Random reorder of the question list. Flags travel with their question.
    pub fn shuffle_questions<G: Rng + ?Sized>(&mut self, rng: &mut G) {
        self.questions.shuffle(rng);
    }

    /// Local copy of a like counter write. `None` when the player is not replicated here.
    pub fn set_likes(&mut self, player_id: &str, likes: u32) -> Option<Applied<String>> {
        let player = self.players.get_mut(&player_id.to_string())?;
        player.likes = likes;
        Some(Applied::Updated(player.id.clone()))
    }
}
