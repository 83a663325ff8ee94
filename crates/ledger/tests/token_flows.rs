mod support;

use std::collections::BTreeMap;
use support::{boot, coin_for_shard, next_shard_block};
use veil_ledger::tx::{
    PrivacyTokenData, StakeRole, TokenData, TokenKind, Tx, TxBase, TxProof,
};
use veil_ledger::utxo;

fn token_id(tag: u8) -> [u8; 32] {
    let mut id = [0u8; 32];
    id[0] = tag;
    id
}

fn custom_token_init(tag: u8) -> Tx {
    Tx::CustomToken {
        base: TxBase::default(),
        token: TokenData {
            property_id: token_id(tag),
            property_name: "token".into(),
            property_symbol: "TOK".into(),
            kind: TokenKind::Init,
            mintable: false,
            amount: 1_000,
            vins: Vec::new(),
            vouts: Vec::new(),
        },
    }
}

fn privacy_token_init(tag: u8) -> Tx {
    Tx::PrivacyToken {
        base: TxBase::default(),
        token: PrivacyTokenData {
            property_id: token_id(tag),
            property_name: "ptoken".into(),
            property_symbol: "PTK".into(),
            kind: TokenKind::Init,
            mintable: true,
            amount: 500,
            proof: TxProof {
                input_coins: Vec::new(),
                output_coins: vec![coin_for_shard(0, tag, 500)],
            },
        },
    }
}

#[test]
fn token_inits_register_and_revert_unregisters() {
    let h = boot(2);
    let ctx = &h.ctx;

    let block = next_shard_block(
        ctx,
        0,
        vec![custom_token_init(0x0a), privacy_token_init(0x0b)],
        BTreeMap::new(),
        Vec::new(),
        1,
    );
    ctx.insert_shard_block(&block).unwrap();

    assert!(utxo::has_custom_token(&ctx.db, &token_id(0x0a)).unwrap());
    assert!(utxo::has_privacy_token(&ctx.db, &token_id(0x0b)).unwrap());
    // The privacy token's minted outputs index under its own token id.
    assert_eq!(utxo::commitment_length(&ctx.db, &token_id(0x0b), 0).unwrap(), 1);

    ctx.revert_shard_state(0).unwrap();
    assert!(!utxo::has_custom_token(&ctx.db, &token_id(0x0a)).unwrap());
    assert!(!utxo::has_privacy_token(&ctx.db, &token_id(0x0b)).unwrap());
    assert_eq!(utxo::commitment_length(&ctx.db, &token_id(0x0b), 0).unwrap(), 0);
}

#[test]
fn staking_txs_surface_in_the_shard_to_beacon_projection() {
    let h = boot(2);
    let ctx = &h.ctx;

    let candidate = support::key_string(0x95, 1);
    let staking = Tx::Staking {
        base: TxBase::default(),
        role: StakeRole::Shard,
        candidate: candidate.clone(),
    };
    let block = next_shard_block(ctx, 0, vec![staking], BTreeMap::new(), Vec::new(), 1);
    ctx.insert_shard_block(&block).unwrap();

    let projection = block.to_shard_to_beacon();
    assert_eq!(projection.header.hash(), block.header.hash());
    let stake_line = projection
        .instructions
        .iter()
        .find(|line| line.first().map(String::as_str) == Some("stake"))
        .expect("stake instruction derived from the staking tx");
    assert!(stake_line[1].contains(&candidate));
    assert_eq!(stake_line[2], "shard");
}
