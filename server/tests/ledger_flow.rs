use chrono::{Duration, Utc};
use common::{BetSlip, Game, PotentialGame};
use rust_decimal::Decimal;
use server::catalog::Catalog;
use server::config::{DatabaseSettings, LedgerSettings};
use server::database::{record_key, DatabaseConnection};
use server::error::LedgerError;
use server::identity::Principal;
use server::ledger;
use server::ledger_manager::{LedgerRequest, LedgerResponder};
use server::spawn_services;
use tokio::sync::{mpsc, oneshot};

const CATALOG: &str = r#"[
    {"category": "Best Picture  (more info)", "predictions": [
        {"name": "Anora", "odds": "1/2"},
        {"name": "Conclave", "odds": "2/1"}
    ]},
    {"category": "Best Director", "predictions": [
        {"name": "Sean Baker", "odds": "1/4"},
        {"name": "Brady Corbet", "odds": "3/1"}
    ]}
]"#;

fn d(value: &str) -> Decimal {
    value.parse().unwrap()
}

async fn start(settings: LedgerSettings) -> mpsc::Sender<LedgerRequest> {
    let database = DatabaseConnection::new(&DatabaseSettings::in_memory())
        .await
        .expect("embedded store should open");
    let catalog = Catalog::from_json(CATALOG).unwrap();
    spawn_services(database, catalog, settings).ledger_tx
}

async fn call<T>(
    ledger_tx: &mpsc::Sender<LedgerRequest>,
    request: impl FnOnce(LedgerResponder<T>) -> LedgerRequest,
) -> Result<T, LedgerError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    ledger_tx.send(request(resp_tx)).await.unwrap();
    resp_rx.await.unwrap()
}

fn admin() -> Principal {
    Principal::new("admin")
}

fn alice() -> Principal {
    Principal::new("alice")
}

async fn create_game(ledger_tx: &mpsc::Sender<LedgerRequest>) -> Game {
    let game = PotentialGame {
        name: "Oscars night".into(),
        initial_balance: d("1000"),
        start_date: Utc::now(),
        end_date: Utc::now() + Duration::hours(5),
    };
    call(ledger_tx, |responder| LedgerRequest::CreateGame {
        principal: admin(),
        game,
        responder,
    })
    .await
    .expect("game should be created")
}

async fn join(ledger_tx: &mpsc::Sender<LedgerRequest>, game: &Game, who: Principal) {
    let (code, _) = call(ledger_tx, |responder| LedgerRequest::GenerateJoinCode {
        principal: admin(),
        game_id: game.id.clone(),
        responder,
    })
    .await
    .unwrap();
    call(ledger_tx, |responder| LedgerRequest::JoinGame {
        principal: who,
        game_id: game.id.clone(),
        code,
        responder,
    })
    .await
    .unwrap();
}

async fn read(ledger_tx: &mpsc::Sender<LedgerRequest>, game_id: &str, who: Principal) -> Result<Game, LedgerError> {
    call(ledger_tx, |responder| LedgerRequest::ReadGame {
        principal: who,
        game_id: game_id.to_string(),
        responder,
    })
    .await
}

async fn place(
    ledger_tx: &mpsc::Sender<LedgerRequest>,
    game_id: &str,
    who: Principal,
    bets: Vec<BetSlip>,
) -> Result<(Decimal, Vec<common::Bet>), LedgerError> {
    call(ledger_tx, |responder| LedgerRequest::PlaceBets {
        principal: who,
        game_id: game_id.to_string(),
        bets,
        responder,
    })
    .await
}

async fn resolve(
    ledger_tx: &mpsc::Sender<LedgerRequest>,
    game_id: &str,
    category_id: &str,
    winner_id: &str,
) -> Result<Game, LedgerError> {
    call(ledger_tx, |responder| LedgerRequest::ResolveCategory {
        principal: admin(),
        game_id: game_id.to_string(),
        category_id: category_id.to_string(),
        winner_id: winner_id.to_string(),
        responder,
    })
    .await
}

async fn lock(ledger_tx: &mpsc::Sender<LedgerRequest>, game_id: &str, who: Principal) -> Result<Game, LedgerError> {
    call(ledger_tx, |responder| LedgerRequest::LockGame {
        principal: who,
        game_id: game_id.to_string(),
        responder,
    })
    .await
}

/// (category id, nominee id) for a nominee looked up by display names.
fn ids(game: &Game, category: &str, nominee: &str) -> (String, String) {
    let category = game.categories.iter().find(|c| c.name == category).unwrap();
    let nominee = category.nominees.iter().find(|n| n.name == nominee).unwrap();
    (category.id.clone(), nominee.id.clone())
}

fn balance(game: &Game, principal: &str) -> Decimal {
    game.participants
        .iter()
        .find(|participant| participant.principal == principal)
        .unwrap()
        .balance
}

#[tokio::test]
async fn game_is_seeded_from_the_catalog() {
    let ledger_tx = start(LedgerSettings::default()).await;
    let game = create_game(&ledger_tx).await;

    assert!(!game.locked);
    let names: Vec<_> = game.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Best Picture", "Best Director"]);
    assert_eq!(game.categories[0].nominees[1].odds, d("3"));
    assert_eq!(game.participants.len(), 1);
    assert_eq!(balance(&game, "admin"), d("1000"));

    let listed = call(&ledger_tx, |responder| LedgerRequest::ListGames {
        principal: admin(),
        responder,
    })
    .await
    .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, game.id);
}

#[tokio::test]
async fn bet_lock_resolve_and_pay_out() {
    let ledger_tx = start(LedgerSettings::default()).await;
    let game = create_game(&ledger_tx).await;
    join(&ledger_tx, &game, alice()).await;
    let (picture, conclave) = ids(&game, "Best Picture", "Conclave");

    let (after_bet, bets) = place(
        &ledger_tx,
        &game.id,
        alice(),
        vec![BetSlip {
            category_id: picture.clone(),
            nominee_id: conclave.clone(),
            amount: d("300"),
        }],
    )
    .await
    .unwrap();
    assert_eq!(after_bet, d("700"));
    assert_eq!(bets.len(), 1);
    assert_eq!(bets[0].nominee_name, "Conclave");

    // not locked yet
    let err = resolve(&ledger_tx, &game.id, &picture, &conclave).await.unwrap_err();
    assert_eq!(err, LedgerError::GameNotLocked);
    assert_eq!(balance(&read(&ledger_tx, &game.id, alice()).await.unwrap(), "alice"), d("700"));

    assert!(matches!(lock(&ledger_tx, &game.id, alice()).await, Err(LedgerError::Forbidden(_))));
    assert!(lock(&ledger_tx, &game.id, admin()).await.unwrap().locked);
    assert!(lock(&ledger_tx, &game.id, admin()).await.unwrap().locked);

    let err = place(&ledger_tx, &game.id, alice(), vec![]).await.unwrap_err();
    assert_eq!(err, LedgerError::GameLocked);

    let settled = resolve(&ledger_tx, &game.id, &picture, &conclave).await.unwrap();
    assert_eq!(balance(&settled, "alice"), d("1600"));
    let alice_view = settled.participants.iter().find(|p| p.principal == "alice").unwrap();
    assert!(alice_view.bets[0].paid_out);
    assert_eq!(alice_view.bets[0].payout_amount, Some(d("600")));
    assert_eq!(settled.categories[0].winner_id.as_deref(), Some(conclave.as_str()));
    assert_eq!(settled.leaderboard[0].principal, "alice");

    // a second resolution neither fails open nor pays again
    let (_, anora) = ids(&game, "Best Picture", "Anora");
    let err = resolve(&ledger_tx, &game.id, &picture, &anora).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyResolved(_)));
    let again = read(&ledger_tx, &game.id, alice()).await.unwrap();
    assert_eq!(balance(&again, "alice"), d("1600"));

    // nobody bet on director; resolving it moves no money
    let (director, baker) = ids(&game, "Best Director", "Sean Baker");
    let settled = resolve(&ledger_tx, &game.id, &director, &baker).await.unwrap();
    assert_eq!(balance(&settled, "alice"), d("1600"));
    assert_eq!(balance(&settled, "admin"), d("1000"));
}

#[tokio::test]
async fn rejected_batches_leave_no_trace() {
    let ledger_tx = start(LedgerSettings::default()).await;
    let game = create_game(&ledger_tx).await;
    join(&ledger_tx, &game, alice()).await;
    let (picture, anora) = ids(&game, "Best Picture", "Anora");
    let (director, corbet) = ids(&game, "Best Director", "Brady Corbet");

    let err = place(
        &ledger_tx,
        &game.id,
        alice(),
        vec![
            BetSlip { category_id: picture.clone(), nominee_id: anora.clone(), amount: d("600") },
            BetSlip { category_id: director.clone(), nominee_id: corbet.clone(), amount: d("401") },
        ],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    let view = read(&ledger_tx, &game.id, alice()).await.unwrap();
    let alice_view = view.participants.iter().find(|p| p.principal == "alice").unwrap();
    assert_eq!(alice_view.balance, d("1000"));
    assert!(alice_view.bets.is_empty());

    // replace one category, keep the other
    place(
        &ledger_tx,
        &game.id,
        alice(),
        vec![
            BetSlip { category_id: picture.clone(), nominee_id: anora.clone(), amount: d("200") },
            BetSlip { category_id: director.clone(), nominee_id: corbet.clone(), amount: d("100") },
        ],
    )
    .await
    .unwrap();
    let (balance_after, bets) = place(
        &ledger_tx,
        &game.id,
        alice(),
        vec![BetSlip { category_id: picture.clone(), nominee_id: anora.clone(), amount: d("500") }],
    )
    .await
    .unwrap();
    assert_eq!(balance_after, d("400"));
    let amounts: Vec<_> = bets.iter().map(|bet| (bet.category_id.clone(), bet.amount)).collect();
    assert_eq!(amounts, [(picture, d("500")), (director, d("100"))]);
}

#[tokio::test]
async fn join_codes_gate_membership() {
    let settings = LedgerSettings {
        max_participants: 2,
        ..LedgerSettings::default()
    };
    let ledger_tx = start(settings).await;
    let game = create_game(&ledger_tx).await;

    let err = call(&ledger_tx, |responder| LedgerRequest::GenerateJoinCode {
        principal: alice(),
        game_id: game.id.clone(),
        responder,
    })
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    let (code, expires_at) = call(&ledger_tx, |responder| LedgerRequest::GenerateJoinCode {
        principal: admin(),
        game_id: game.id.clone(),
        responder,
    })
    .await
    .unwrap();
    assert!(expires_at > Utc::now() + Duration::hours(23));

    let summary = call(&ledger_tx, |responder| LedgerRequest::VerifyJoinCode {
        code: code.to_lowercase(),
        responder,
    })
    .await
    .unwrap();
    assert_eq!(summary.id, game.id);
    assert_eq!(summary.participant_count, 1);

    let err = call(&ledger_tx, |responder| LedgerRequest::JoinGame {
        principal: alice(),
        game_id: game.id.clone(),
        code: "000000".into(),
        responder,
    })
    .await
    .unwrap_err();
    // a random code could in principle equal the issued one
    if code != "000000" {
        assert_eq!(err, LedgerError::JoinCodeInvalidOrExpired);
    }

    let joined = call(&ledger_tx, |responder| LedgerRequest::JoinGame {
        principal: alice(),
        game_id: game.id.clone(),
        code: code.clone(),
        responder,
    })
    .await
    .unwrap();
    assert_eq!(joined.balance, d("1000"));

    let rejoined = call(&ledger_tx, |responder| LedgerRequest::JoinGame {
        principal: alice(),
        game_id: game.id.clone(),
        code: code.clone(),
        responder,
    })
    .await
    .unwrap();
    assert_eq!(rejoined.id, joined.id);

    let err = call(&ledger_tx, |responder| LedgerRequest::JoinGame {
        principal: Principal::new("bob"),
        game_id: game.id.clone(),
        code,
        responder,
    })
    .await
    .unwrap_err();
    assert_eq!(err, LedgerError::GameAtCapacity(2));
}

#[tokio::test]
async fn admin_deletes_the_whole_game() {
    let ledger_tx = start(LedgerSettings::default()).await;
    let game = create_game(&ledger_tx).await;
    join(&ledger_tx, &game, alice()).await;

    let err = call(&ledger_tx, |responder| LedgerRequest::DeleteGame {
        principal: alice(),
        game_id: game.id.clone(),
        responder,
    })
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    call(&ledger_tx, |responder| LedgerRequest::DeleteGame {
        principal: admin(),
        game_id: game.id.clone(),
        responder,
    })
    .await
    .unwrap();

    let err = read(&ledger_tx, &game.id, admin()).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    let listed = call(&ledger_tx, |responder| LedgerRequest::ListGames {
        principal: alice(),
        responder,
    })
    .await
    .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn store_refuses_to_settle_a_category_twice() {
    let mut database = DatabaseConnection::new(&DatabaseSettings::in_memory())
        .await
        .unwrap();
    let catalog = Catalog::from_json(CATALOG).unwrap();
    let potential = PotentialGame {
        name: "Oscars night".into(),
        initial_balance: d("1000"),
        start_date: Utc::now(),
        end_date: Utc::now() + Duration::hours(5),
    };
    let (game, categories, admin_seat) =
        ledger::plan_new_game(&admin(), &potential, &catalog, Utc::now()).unwrap();
    database.create_game(&game, &categories, &admin_seat).await.unwrap();

    let picture = record_key(&categories[0].category.id);
    let conclave = categories[0]
        .nominees
        .iter()
        .find(|nominee| nominee.name == "Conclave")
        .map(|nominee| record_key(&nominee.id))
        .unwrap();

    let records = database.load_game(&game.id).await.unwrap().unwrap();
    let plan = ledger::plan_bets(
        &records,
        &admin(),
        &[BetSlip { category_id: picture.clone(), nominee_id: conclave.clone(), amount: d("300") }],
    )
    .unwrap();
    database.apply_bet_plan(&plan).await.unwrap();
    database.lock_game(&game.id).await.unwrap();

    let records = database.load_game(&game.id).await.unwrap().unwrap();
    let settlement = ledger::plan_settlement(&records, &admin(), &picture, &conclave).unwrap();
    database.apply_settlement(&settlement).await.unwrap();
    assert!(database.apply_settlement(&settlement).await.is_err());

    let records = database.load_game(&game.id).await.unwrap().unwrap();
    assert_eq!(records.participants[0].balance, d("1600"));
    assert_eq!(records.bets.len(), 1);
    assert!(records.bets[0].paid_out);
    assert_eq!(records.bets[0].payout_amount, Some(d("600")));
    assert_eq!(
        records.categories[0].winner.as_ref().map(record_key),
        Some(conclave)
    );
}
